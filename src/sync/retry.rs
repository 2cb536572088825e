// =============================================================================
// Retry policy for failed range fetches: capped exponential backoff
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total fetch attempts per range, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `failed + 1`, given `failed` failures so far.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(31);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1_u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Whether a range that has failed `failed` times may be tried again.
    pub fn allows_retry(&self, failed: u32) -> bool {
        failed < self.max_attempts
    }
}
