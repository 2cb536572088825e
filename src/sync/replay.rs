// =============================================================================
// ReplaySource: in-memory MarketSource for offline runs and tests
// =============================================================================
//
// Serves whatever records were loaded into it, filtered to the requested
// range. Failures can be injected to exercise the retry path, and an
// artificial latency keeps a fetch in flight long enough to observe
// concurrent behavior.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::UpstreamError;
use crate::records::{Candle, Record, Trade};
use crate::sync::MarketSource;
use crate::time::{TimeInterval, TimeStep};
use crate::types::normalize_symbol;

#[derive(Debug, Default)]
pub struct ReplaySource {
    trades: RwLock<HashMap<String, Vec<Trade>>>,
    candles: RwLock<HashMap<(String, TimeStep), Vec<Candle>>>,
    failures_left: AtomicU32,
    calls: AtomicU64,
    latency: RwLock<Option<Duration>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_trades<I: IntoIterator<Item = Trade>>(&self, symbol: &str, trades: I) {
        self.trades
            .write()
            .entry(normalize_symbol(symbol))
            .or_default()
            .extend(trades);
    }

    pub fn load_candles<I: IntoIterator<Item = Candle>>(&self, symbol: &str, step: TimeStep, candles: I) {
        self.candles
            .write()
            .entry((normalize_symbol(symbol), step))
            .or_default()
            .extend(candles);
    }

    /// Make the next `n` fetches fail with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of fetches served or failed so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(anyhow::anyhow!("injected replay failure").into());
        }
        Ok(())
    }
}

fn in_range<R: Record>(records: &[R], interval: &TimeInterval) -> Vec<R> {
    records
        .iter()
        .filter(|r| {
            interval.start().map_or(true, |s| r.end() >= s)
                && interval.end().map_or(true, |e| r.start() <= e)
        })
        .cloned()
        .collect()
}

#[async_trait]
impl MarketSource for ReplaySource {
    async fn fetch_trades(
        &self,
        symbol: &str,
        interval: &TimeInterval,
    ) -> Result<Vec<Trade>, UpstreamError> {
        self.begin_call().await?;
        let out = self
            .trades
            .read()
            .get(&normalize_symbol(symbol))
            .map(|rows| in_range(rows, interval))
            .unwrap_or_default();
        debug!(symbol, %interval, count = out.len(), "replay trades served");
        Ok(out)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        step: TimeStep,
        interval: &TimeInterval,
    ) -> Result<Vec<Candle>, UpstreamError> {
        self.begin_call().await?;
        let out = self
            .candles
            .read()
            .get(&(normalize_symbol(symbol), step))
            .map(|rows| in_range(rows, interval))
            .unwrap_or_default();
        debug!(symbol, %step, %interval, count = out.len(), "replay candles served");
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{minute_candle, trade};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn serves_only_the_requested_range() {
        let source = ReplaySource::new();
        source.load_trades("btcusdt", (1..=5).map(|i| trade(i, i as i64 * 1_000, dec!(100))));
        let iv = TimeInterval::between(2_000_i64, 4_000_i64).unwrap();
        let got = source.fetch_trades("BTCUSDT", &iv).await.unwrap();
        assert_eq!(got.iter().map(|t| t.id()).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(source.fetch_trades("ETHUSDT", &iv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn candles_are_keyed_by_step() {
        let source = ReplaySource::new();
        source.load_candles("BTCUSDT", TimeStep::M1, (0..3).map(|m| minute_candle(m, dec!(1), 1, dec!(1))));
        let all = TimeInterval::unbounded();
        assert_eq!(source.fetch_candles("BTCUSDT", TimeStep::M1, &all).await.unwrap().len(), 3);
        assert!(source.fetch_candles("BTCUSDT", TimeStep::M5, &all).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let source = ReplaySource::new();
        source.fail_next(2);
        let all = TimeInterval::unbounded();
        assert!(source.fetch_trades("BTCUSDT", &all).await.is_err());
        assert!(source.fetch_trades("BTCUSDT", &all).await.is_err());
        assert!(source.fetch_trades("BTCUSDT", &all).await.is_ok());
        assert_eq!(source.calls(), 3);
    }
}
