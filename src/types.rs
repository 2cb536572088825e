// =============================================================================
// Shared types used across the frame and synchronization layers
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::time::TimeStep;

/// Direction of an order, used to pick a rounding direction for prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Which record stream a synchronized view carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Trades,
    Candles(TimeStep),
}

impl DataKind {
    /// Step carried by candle streams, `None` for trades.
    pub fn step(&self) -> Option<TimeStep> {
        match self {
            Self::Trades => None,
            Self::Candles(step) => Some(*step),
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trades => write!(f, "trades"),
            Self::Candles(step) => write!(f, "kline_{step}"),
        }
    }
}

/// Composite key that identifies one synchronized stream.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SyncKey {
    pub symbol: String,
    pub kind: DataKind,
}

impl SyncKey {
    /// Build a key, normalizing the symbol to its upper-case exchange form.
    pub fn new(symbol: &str, kind: DataKind) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            kind,
        }
    }

    pub fn trades(symbol: &str) -> Self {
        Self::new(symbol, DataKind::Trades)
    }

    pub fn candles(symbol: &str, step: TimeStep) -> Self {
        Self::new(symbol, DataKind::Candles(step))
    }
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.kind)
    }
}

pub(crate) fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
