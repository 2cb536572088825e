// =============================================================================
// Candle: one OHLCV bucket, keyed by its open time
// =============================================================================

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{FrameError, FrameResult};
use crate::records::{IntoTimestamp, Record, Timestamp};

/// A validated, immutable OHLCV candle.
///
/// Invariants: `open_time < close_time`, `high >= max(open, close)`,
/// `low <= min(open, close)`, and every volume is non-negative.
#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    open_time: Timestamp,
    close_time: Timestamp,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    quote_volume: Decimal,
    trade_count: u64,
    taker_buy_volume: Decimal,
    taker_buy_quote_volume: Decimal,
    is_best_match: bool,
}

/// Candle as produced by a transport, before validation and time normalization.
#[derive(Debug, Clone)]
pub struct RawCandle<T> {
    pub open_time: T,
    pub close_time: T,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    pub is_best_match: bool,
}

impl<T: IntoTimestamp> TryFrom<RawCandle<T>> for Candle {
    type Error = FrameError;

    fn try_from(raw: RawCandle<T>) -> FrameResult<Self> {
        let open_time = raw.open_time.into_timestamp()?;
        let close_time = raw.close_time.into_timestamp()?;

        if open_time >= close_time {
            return Err(FrameError::invalid(format!(
                "candle open {open_time} is not before close {close_time}"
            )));
        }
        if raw.high < raw.open.max(raw.close) {
            return Err(FrameError::invalid(format!(
                "candle {open_time}: high {} below body {}..{}",
                raw.high, raw.open, raw.close
            )));
        }
        if raw.low > raw.open.min(raw.close) {
            return Err(FrameError::invalid(format!(
                "candle {open_time}: low {} above body {}..{}",
                raw.low, raw.open, raw.close
            )));
        }
        for (name, value) in [
            ("volume", raw.volume),
            ("quote_volume", raw.quote_volume),
            ("taker_buy_volume", raw.taker_buy_volume),
            ("taker_buy_quote_volume", raw.taker_buy_quote_volume),
        ] {
            if value < Decimal::ZERO {
                return Err(FrameError::invalid(format!(
                    "candle {open_time}: negative {name} {value}"
                )));
            }
        }

        Ok(Self {
            open_time,
            close_time,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            quote_volume: raw.quote_volume,
            trade_count: raw.trade_count,
            taker_buy_volume: raw.taker_buy_volume,
            taker_buy_quote_volume: raw.taker_buy_quote_volume,
            is_best_match: raw.is_best_match,
        })
    }
}

impl Candle {
    pub fn open_time(&self) -> Timestamp {
        self.open_time
    }

    pub fn close_time(&self) -> Timestamp {
        self.close_time
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn quote_volume(&self) -> Decimal {
        self.quote_volume
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    pub fn taker_buy_volume(&self) -> Decimal {
        self.taker_buy_volume
    }

    pub fn taker_buy_quote_volume(&self) -> Decimal {
        self.taker_buy_quote_volume
    }

    pub fn is_best_match(&self) -> bool {
        self.is_best_match
    }

    /// True when `self`'s high/low band contains `other`'s and is strictly
    /// larger on at least one side.
    fn band_strictly_wider(&self, other: &Candle) -> bool {
        self.high >= other.high
            && self.low <= other.low
            && (self.high > other.high || self.low < other.low)
    }
}

impl PartialEq for Candle {
    fn eq(&self, other: &Self) -> bool {
        self.open_time.approx_eq(&other.open_time)
            && self.close_time.approx_eq(&other.close_time)
            && self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
            && self.quote_volume == other.quote_volume
            && self.trade_count == other.trade_count
            && self.taker_buy_volume == other.taker_buy_volume
            && self.taker_buy_quote_volume == other.taker_buy_quote_volume
            && self.is_best_match == other.is_best_match
    }
}

impl Record for Candle {
    type Key = Timestamp;

    fn key(&self) -> Timestamp {
        self.open_time
    }

    fn start(&self) -> Timestamp {
        self.open_time
    }

    fn end(&self) -> Timestamp {
        self.close_time
    }

    /// Successive polls of a live bucket only ever grow it, so the more
    /// complete aggregate wins: more trades, then more volume, then a wider
    /// band. Ties keep `self`.
    fn supersedes(&self, other: &Self) -> bool {
        match self.trade_count.cmp(&other.trade_count) {
            std::cmp::Ordering::Greater => return true,
            std::cmp::Ordering::Less => return false,
            std::cmp::Ordering::Equal => {}
        }
        match self.volume.cmp(&other.volume) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => !other.band_strictly_wider(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{candle, raw_candle};
    use rust_decimal_macros::dec;

    #[test]
    fn valid_candle_builds() {
        let c = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 5, dec!(3));
        assert_eq!(c.key().as_millis(), 0);
        assert_eq!(c.end().as_millis(), 59_999);
        assert_eq!(c.trade_count(), 5);
    }

    #[test]
    fn rejects_broken_ohlc_band() {
        let mut raw = raw_candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11));
        raw.high = dec!(10.5);
        assert!(matches!(Candle::try_from(raw), Err(FrameError::InvalidRecord(_))));

        let mut raw = raw_candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11));
        raw.low = dec!(10.5);
        assert!(matches!(Candle::try_from(raw), Err(FrameError::InvalidRecord(_))));
    }

    #[test]
    fn rejects_inverted_times_and_negative_volume() {
        let mut raw = raw_candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11));
        raw.close_time = 0;
        assert!(Candle::try_from(raw).is_err());

        let mut raw = raw_candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11));
        raw.taker_buy_volume = dec!(-0.1);
        assert!(Candle::try_from(raw).is_err());
    }

    #[test]
    fn more_trades_wins_regardless_of_side() {
        let partial = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 5, dec!(3));
        let fuller = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 8, dec!(1));
        assert!(!partial.supersedes(&fuller));
        assert!(fuller.supersedes(&partial));
    }

    #[test]
    fn volume_breaks_trade_count_ties() {
        let a = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 5, dec!(3));
        let b = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 5, dec!(4));
        assert!(!a.supersedes(&b));
        assert!(b.supersedes(&a));
    }

    #[test]
    fn strictly_wider_band_breaks_remaining_ties() {
        let narrow = candle(0, 60_000, dec!(10), dec!(12), dec!(9), dec!(11), 5, dec!(3));
        let wide = candle(0, 60_000, dec!(10), dec!(12), dec!(8), dec!(11), 5, dec!(3));
        let skewed = candle(0, 60_000, dec!(10), dec!(13), dec!(9.5), dec!(11), 5, dec!(3));
        assert!(!narrow.supersedes(&wide));
        assert!(wide.supersedes(&narrow));
        // Neither band contains the other: left operand stays.
        assert!(narrow.supersedes(&skewed));
        assert!(skewed.supersedes(&narrow));
        // Identical candles: left operand stays.
        assert!(narrow.supersedes(&narrow.clone()));
    }
}
