// =============================================================================
// market-frames: immutable market-data frames kept fresh by background sync
// =============================================================================
//
//   records   Trade / Candle values, timestamps, decimal rounding
//   time      TimeStep ladder and TimeInterval ranges
//   frame     Frame<R>: key-ordered immutable collection with set algebra
//   sync      SyncView / SyncRegistry: demand-driven fetch loops
//   binance   REST transport implementing MarketSource
//   config    JSON configuration with atomic save
// =============================================================================

pub mod binance;
pub mod config;
pub mod error;
pub mod frame;
pub mod records;
pub mod sync;
pub mod time;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::{FrameError, FrameResult, UpstreamError};
pub use frame::{CandleFrame, Frame, Lookup, TradeFrame};
pub use records::{Candle, IntoTimestamp, Record, Timestamp, Trade};
pub use sync::{MarketSource, SyncEvent, SyncRegistry, SyncSettings, SyncView};
pub use time::{TimeInterval, TimeStep};
pub use types::{DataKind, Side, SyncKey};
