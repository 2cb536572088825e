// =============================================================================
// Synchronization: demand-driven background fetching into shared Frames
// =============================================================================
//
// One SyncView per (symbol, data kind). A view owns the only mutable state in
// the system: the current Frame (swapped atomically behind an Arc), the queue
// of requested ranges, and the handle of its single background loop.
//
// Failures never reach Frame readers. They are visible through per-view
// SyncHealth counters and the registry-wide SyncEvent broadcast.
// =============================================================================

pub mod registry;
pub mod replay;
pub mod retry;
pub mod source;
pub mod view;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::records::Timestamp;
use crate::time::TimeInterval;
use crate::types::SyncKey;

pub use registry::{AnyView, SyncRegistry};
pub use replay::ReplaySource;
pub use retry::RetryPolicy;
pub use source::{Fetch, MarketSource};
pub use view::{SyncSettings, SyncView};

// ── Events ────────────────────────────────────────────────────────────────

/// Notable outcome of one loop step, fanned out to registry subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Merged {
        key: SyncKey,
        interval: TimeInterval,
        fetched: usize,
        total: usize,
    },
    FetchFailed {
        key: SyncKey,
        interval: TimeInterval,
        attempt: u32,
        error: String,
    },
    /// The range exhausted its retry budget and left the queue.
    RangeDropped {
        key: SyncKey,
        interval: TimeInterval,
        attempts: u32,
        error: String,
    },
}

impl SyncEvent {
    pub fn key(&self) -> &SyncKey {
        match self {
            Self::Merged { key, .. } | Self::FetchFailed { key, .. } | Self::RangeDropped { key, .. } => key,
        }
    }
}

// ── Health ────────────────────────────────────────────────────────────────

/// Lock-free loop counters for one view.
#[derive(Debug, Default)]
pub struct SyncHealth {
    passes: AtomicU64,
    fetches_ok: AtomicU64,
    fetches_failed: AtomicU64,
    records_merged: AtomicU64,
    ranges_dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_success: Mutex<Option<Timestamp>>,
}

/// Serializable copy of [`SyncHealth`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub passes: u64,
    pub fetches_ok: u64,
    pub fetches_failed: u64,
    pub records_merged: u64,
    pub ranges_dropped: u64,
    pub last_error: Option<String>,
    pub last_success: Option<Timestamp>,
}

impl SyncHealth {
    pub(crate) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, merged: usize) {
        self.fetches_ok.fetch_add(1, Ordering::Relaxed);
        self.records_merged.fetch_add(merged as u64, Ordering::Relaxed);
        *self.last_success.lock() = Some(Timestamp::now());
    }

    pub(crate) fn record_failure(&self, error: &str) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }

    pub(crate) fn record_drop(&self) {
        self.ranges_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            fetches_ok: self.fetches_ok.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            records_merged: self.records_merged.load(Ordering::Relaxed),
            ranges_dropped: self.ranges_dropped.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            last_success: *self.last_success.lock(),
        }
    }
}
