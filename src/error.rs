// =============================================================================
// Error taxonomy: local validation failures vs. upstream transport failures
// =============================================================================
//
// FrameError is returned by every pure operation (record construction, key
// lookup, interval construction). UpstreamError only ever crosses the
// transport boundary and is absorbed by the synchronization loop; readers of
// a Frame never observe it.
//
// Programmer errors (merging intervals of different steps, asking a candle
// view for a foreign step) are not represented here: they panic.
// =============================================================================

use thiserror::Error;

/// Failure of a pure frame/record operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A timestamp or id falls outside the representable storage domain.
    #[error("value out of range: {0}")]
    Range(String),

    /// Exact or secondary key lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record violates one of its construction invariants.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Interval bounds are inverted.
    #[error("invalid interval: start {start} is after end {end}")]
    InvalidInterval { start: String, end: String },
}

impl FrameError {
    pub(crate) fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }
}

/// Failure reported by a market-data source during a fetch.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The local request-weight budget is exhausted; nothing was sent.
    #[error("rate-limit budget exhausted (used weight {used_weight})")]
    RateLimited { used_weight: u32 },

    /// The source answered, but a row could not be normalized.
    #[error("upstream returned a malformed record: {0}")]
    Record(#[from] FrameError),

    /// Transport, HTTP status, or decoding failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_wraps_record_errors() {
        let err: UpstreamError = FrameError::invalid("low above high").into();
        assert!(err.to_string().contains("low above high"));
    }

    #[test]
    fn transport_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection reset").context("GET /api/v3/klines failed");
        let err = UpstreamError::from(inner);
        assert_eq!(err.to_string(), "GET /api/v3/klines failed");
    }
}
