// =============================================================================
// Market-data source: the transport seam a SyncView fetches through
// =============================================================================

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::UpstreamError;
use crate::records::{Candle, Record, Trade};
use crate::time::{TimeInterval, TimeStep};
use crate::types::{DataKind, SyncKey};

/// A fetcher of normalized records for a time range. Either bound of the
/// range may be open; the source decides what "everything" means.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_trades(
        &self,
        symbol: &str,
        interval: &TimeInterval,
    ) -> Result<Vec<Trade>, UpstreamError>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        step: TimeStep,
        interval: &TimeInterval,
    ) -> Result<Vec<Candle>, UpstreamError>;

    /// Short label used in logs.
    fn name(&self) -> &'static str {
        "source"
    }
}

/// Record kinds a SyncView can keep synchronized.
pub trait Fetch: Record {
    fn fetch<'a>(
        source: &'a dyn MarketSource,
        key: &'a SyncKey,
        interval: &'a TimeInterval,
    ) -> BoxFuture<'a, Result<Vec<Self>, UpstreamError>>;
}

impl Fetch for Trade {
    fn fetch<'a>(
        source: &'a dyn MarketSource,
        key: &'a SyncKey,
        interval: &'a TimeInterval,
    ) -> BoxFuture<'a, Result<Vec<Self>, UpstreamError>> {
        assert!(
            key.kind == DataKind::Trades,
            "contract violation: trade fetch on {key}"
        );
        source.fetch_trades(&key.symbol, interval)
    }
}

impl Fetch for Candle {
    /// # Panics
    /// If `key` is not a candle key, or `interval` is tagged with a step
    /// other than the key's.
    fn fetch<'a>(
        source: &'a dyn MarketSource,
        key: &'a SyncKey,
        interval: &'a TimeInterval,
    ) -> BoxFuture<'a, Result<Vec<Self>, UpstreamError>> {
        let DataKind::Candles(step) = key.kind else {
            panic!("contract violation: candle fetch on {key}");
        };
        if let Some(tagged) = interval.step() {
            assert!(
                tagged == step,
                "contract violation: {key} asked to fetch {interval}"
            );
        }
        source.fetch_candles(&key.symbol, step, interval)
    }
}
