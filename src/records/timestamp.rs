// =============================================================================
// Timestamp: canonical UTC instant for every record and interval bound
// =============================================================================
//
// Storage is a signed 64-bit count of microseconds since the Unix epoch,
// further bounded so that the same instant always fits in signed 64-bit
// nanoseconds (1677-09-21 .. 2262-04-11). Anything outside that window is a
// RangeError, never a silent clamp.
//
// Inputs accepted by normalization:
//   - chrono DateTime<Utc> / DateTime<FixedOffset>
//   - NaiveDateTime (interpreted as UTC)
//   - f64 epoch seconds
//   - i64 epoch milliseconds
//   - RFC 3339 strings
// Sub-microsecond detail is rounded half-up to the nearest microsecond.
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, FrameResult};

/// Lowest representable instant, in microseconds since the epoch.
const MIN_MICROS: i64 = i64::MIN / 1_000;
/// Highest representable instant, in microseconds since the epoch.
const MAX_MICROS: i64 = i64::MAX / 1_000;

/// A UTC instant with microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "DateTime<Utc>", into = "DateTime<Utc>")]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub const MIN: Timestamp = Timestamp { micros: MIN_MICROS };
    pub const MAX: Timestamp = Timestamp { micros: MAX_MICROS };
    pub const EPOCH: Timestamp = Timestamp { micros: 0 };

    pub fn from_micros(micros: i64) -> FrameResult<Self> {
        if !(MIN_MICROS..=MAX_MICROS).contains(&micros) {
            return Err(FrameError::range(format!(
                "{micros}us since epoch is outside the 64-bit nanosecond window"
            )));
        }
        Ok(Self { micros })
    }

    pub fn from_millis(millis: i64) -> FrameResult<Self> {
        let micros = millis
            .checked_mul(1_000)
            .ok_or_else(|| FrameError::range(format!("{millis}ms since epoch overflows")))?;
        Self::from_micros(micros)
    }

    pub fn from_epoch_seconds(secs: f64) -> FrameResult<Self> {
        let micros = (secs * 1e6).round();
        if !micros.is_finite() || micros < MIN_MICROS as f64 || micros > MAX_MICROS as f64 {
            return Err(FrameError::range(format!(
                "{secs}s since epoch is outside the 64-bit nanosecond window"
            )));
        }
        Self::from_micros(micros as i64)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> FrameResult<Self> {
        let nanos = dt
            .timestamp_nanos_opt()
            .ok_or_else(|| FrameError::range(format!("{dt} is outside the 64-bit nanosecond window")))?;
        let whole = nanos.div_euclid(1_000);
        let micros = if nanos.rem_euclid(1_000) >= 500 {
            whole.saturating_add(1)
        } else {
            whole
        };
        Self::from_micros(micros)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now()).unwrap_or(Self::MAX)
    }

    pub fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn as_millis(&self) -> i64 {
        self.micros.div_euclid(1_000)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros).unwrap_or_default()
    }

    /// Coarsest unit in which this instant is exact: one millisecond when
    /// the sub-millisecond part is zero, otherwise one microsecond.
    pub fn resolution(&self) -> Duration {
        if self.micros.rem_euclid(1_000) == 0 {
            Duration::milliseconds(1)
        } else {
            Duration::microseconds(1)
        }
    }

    /// Equality tolerant to storage round-tripping: the instants differ by
    /// less than the larger of their two resolutions.
    pub fn approx_eq(&self, other: &Timestamp) -> bool {
        let diff = (i128::from(self.micros) - i128::from(other.micros)).abs();
        let tolerance = self
            .resolution()
            .max(other.resolution())
            .num_microseconds()
            .unwrap_or(1);
        diff < i128::from(tolerance)
    }

    pub fn checked_add(&self, delta: Duration) -> Option<Timestamp> {
        let micros = self.micros.checked_add(delta.num_microseconds()?)?;
        Self::from_micros(micros).ok()
    }

    pub fn checked_sub(&self, delta: Duration) -> Option<Timestamp> {
        let micros = self.micros.checked_sub(delta.num_microseconds()?)?;
        Self::from_micros(micros).ok()
    }

    pub fn saturating_sub(&self, delta: Duration) -> Timestamp {
        self.checked_sub(delta).unwrap_or(Self::MIN)
    }

    pub fn saturating_add(&self, delta: Duration) -> Timestamp {
        self.checked_add(delta).unwrap_or(Self::MAX)
    }

    /// Signed distance `self - earlier`.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::microseconds(self.micros - earlier.micros)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_datetime().to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = FrameError;

    fn try_from(dt: DateTime<Utc>) -> FrameResult<Self> {
        Self::from_datetime(dt)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> Self {
        ts.to_datetime()
    }
}

impl FromStr for Timestamp {
    type Err = FrameError;

    fn from_str(s: &str) -> FrameResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(s.trim())
            .map_err(|e| FrameError::invalid(format!("unparseable timestamp '{s}': {e}")))?;
        parsed.into_timestamp()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Anything that denotes an instant and can be normalized to a [`Timestamp`].
pub trait IntoTimestamp {
    fn into_timestamp(self) -> FrameResult<Timestamp>;
}

impl IntoTimestamp for Timestamp {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Ok(self)
    }
}

impl IntoTimestamp for DateTime<Utc> {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Timestamp::from_datetime(self)
    }
}

impl IntoTimestamp for DateTime<FixedOffset> {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Timestamp::from_datetime(self.with_timezone(&Utc))
    }
}

/// Naive instants carry no zone; they are read as UTC.
impl IntoTimestamp for NaiveDateTime {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Timestamp::from_datetime(self.and_utc())
    }
}

/// Epoch seconds.
impl IntoTimestamp for f64 {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Timestamp::from_epoch_seconds(self)
    }
}

/// Epoch milliseconds.
impl IntoTimestamp for i64 {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        Timestamp::from_millis(self)
    }
}

impl IntoTimestamp for &str {
    fn into_timestamp(self) -> FrameResult<Timestamp> {
        self.parse()
    }
}
