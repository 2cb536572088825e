// =============================================================================
// Trade: one executed fill, keyed by its exchange-assigned id
// =============================================================================

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{FrameError, FrameResult};
use crate::records::{IntoTimestamp, KeyInput, Record, Timestamp};

/// A validated, immutable trade record.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    symbol: String,
    id: u64,
    order_id: Option<u64>,
    order_list_id: Option<u64>,
    time: Timestamp,
    price: Decimal,
    quantity: Decimal,
    quote_quantity: Decimal,
    commission: Decimal,
    commission_asset: String,
    is_buyer: bool,
    is_maker: bool,
    is_best_match: bool,
}

/// Trade as produced by a transport, before validation and time normalization.
#[derive(Debug, Clone)]
pub struct RawTrade<T> {
    pub symbol: String,
    pub id: i128,
    pub order_id: Option<i128>,
    /// Exchanges report `-1` for "not part of a list"; negatives map to `None`.
    pub order_list_id: Option<i64>,
    pub time: T,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub is_buyer: bool,
    pub is_maker: bool,
    pub is_best_match: bool,
}

impl<T: IntoTimestamp> TryFrom<RawTrade<T>> for Trade {
    type Error = FrameError;

    fn try_from(raw: RawTrade<T>) -> FrameResult<Self> {
        let id: u64 = raw.id.into_key()?;
        let order_id = raw.order_id.map(KeyInput::<u64>::into_key).transpose()?;
        let order_list_id = raw
            .order_list_id
            .filter(|v| *v >= 0)
            .map(KeyInput::<u64>::into_key)
            .transpose()?;
        let time = raw.time.into_timestamp()?;

        if raw.symbol.trim().is_empty() {
            return Err(FrameError::invalid(format!("trade {id} has an empty symbol")));
        }
        if raw.price <= Decimal::ZERO {
            return Err(FrameError::invalid(format!(
                "trade {id} has non-positive price {}",
                raw.price
            )));
        }
        for (name, value) in [
            ("quantity", raw.quantity),
            ("quote_quantity", raw.quote_quantity),
            ("commission", raw.commission),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(FrameError::invalid(format!("trade {id} has negative {name} {value}")));
            }
        }

        Ok(Self {
            symbol: crate::types::normalize_symbol(&raw.symbol),
            id,
            order_id,
            order_list_id,
            time,
            price: raw.price,
            quantity: raw.quantity,
            quote_quantity: raw.quote_quantity,
            commission: raw.commission,
            commission_asset: raw.commission_asset,
            is_buyer: raw.is_buyer,
            is_maker: raw.is_maker,
            is_best_match: raw.is_best_match,
        })
    }
}

impl Trade {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn order_id(&self) -> Option<u64> {
        self.order_id
    }

    pub fn order_list_id(&self) -> Option<u64> {
        self.order_list_id
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn quote_quantity(&self) -> Decimal {
        self.quote_quantity
    }

    pub fn commission(&self) -> Decimal {
        self.commission
    }

    pub fn commission_asset(&self) -> &str {
        &self.commission_asset
    }

    pub fn is_buyer(&self) -> bool {
        self.is_buyer
    }

    pub fn is_maker(&self) -> bool {
        self.is_maker
    }

    pub fn is_best_match(&self) -> bool {
        self.is_best_match
    }
}

impl PartialEq for Trade {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.symbol == other.symbol
            && self.order_id == other.order_id
            && self.order_list_id == other.order_list_id
            && self.price == other.price
            && self.quantity == other.quantity
            && self.quote_quantity == other.quote_quantity
            && self.commission == other.commission
            && self.commission_asset == other.commission_asset
            && self.is_buyer == other.is_buyer
            && self.is_maker == other.is_maker
            && self.is_best_match == other.is_best_match
            && self.time.approx_eq(&other.time)
    }
}

impl Record for Trade {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }

    fn start(&self) -> Timestamp {
        self.time
    }

    /// Trade ids are unique per exchange: a collision is a re-fetch of the
    /// same fill, so the already-known copy always stays.
    fn supersedes(&self, _other: &Self) -> bool {
        true
    }
}
