// =============================================================================
// Rate-Limit Tracker: request-weight budget for the Binance REST API
// =============================================================================
//
// Binance allows 1200 request weight per minute per IP; we hard-cap ourselves
// at 1000 so that a burst of paginated history fetches never earns a 429 or
// an IP ban.
//
// The tracker reads `X-MBX-USED-WEIGHT-1M` after every response. The header
// describes the current minute only, so a reading older than one minute is
// treated as zero.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;
/// Lifetime of one weight reading.
const WEIGHT_WINDOW_MS: i64 = 60_000;

pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    updated_at_ms: AtomicI64,
    blocked_requests: AtomicU32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub blocked_requests: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            updated_at_ms: AtomicI64::new(0),
            blocked_requests: AtomicU32::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Header-based updates
    // -------------------------------------------------------------------------

    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(weight) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        self.record_weight(weight, Utc::now().timestamp_millis());
    }

    fn record_weight(&self, weight: u32, now_ms: i64) {
        let prev = self.current_weight(now_ms);
        self.used_weight_1m.store(weight, Ordering::Relaxed);
        self.updated_at_ms.store(now_ms, Ordering::Relaxed);
        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "rate-limit weight updated from header");
    }

    fn current_weight(&self, now_ms: i64) -> u32 {
        let updated = self.updated_at_ms.load(Ordering::Relaxed);
        if now_ms - updated >= WEIGHT_WINDOW_MS {
            0
        } else {
            self.used_weight_1m.load(Ordering::Relaxed)
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight checks
    // -------------------------------------------------------------------------

    /// Return `true` if `weight` more request weight fits under the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.can_send_at(weight, Utc::now().timestamp_millis())
    }

    fn can_send_at(&self, weight: u32, now_ms: i64) -> bool {
        let current = self.current_weight(now_ms);
        let allowed = current.saturating_add(weight) <= WEIGHT_HARD_LIMIT;
        if !allowed {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked: would exceed rate-limit"
            );
        }
        allowed
    }

    pub fn used_weight(&self) -> u32 {
        self.current_weight(Utc::now().timestamp_millis())
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight(),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight())
            .field("blocked_requests", &self.blocked_requests.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn header_sets_the_weight() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("990"));
        tracker.update_from_headers(&headers);

        assert_eq!(tracker.used_weight(), 990);
        assert!(tracker.can_send_request(10));
        assert!(!tracker.can_send_request(11));
        assert_eq!(tracker.snapshot().blocked_requests, 1);
    }

    #[test]
    fn malformed_header_is_ignored() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_static("lots"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.used_weight(), 0);
    }

    #[test]
    fn readings_expire_after_a_minute() {
        let tracker = RateLimitTracker::new();
        tracker.record_weight(1_000, 1_000_000);
        assert!(!tracker.can_send_at(1, 1_030_000));
        assert!(tracker.can_send_at(1, 1_060_000));
    }
}
