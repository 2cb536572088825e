// =============================================================================
// TimeStep: the fixed ladder of canonical candle widths
// =============================================================================

use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FrameError;
use crate::records::Timestamp;

/// Weekly buckets open on Monday 00:00 UTC; the epoch fell on a Thursday.
const WEEK_ALIGN_OFFSET_MICROS: i64 = 4 * 86_400 * 1_000_000;

/// Canonical candle width. Variants are declared shortest first, so the
/// derived ordering is the duration ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeStep {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
}

impl TimeStep {
    pub const ALL: [TimeStep; 14] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
    ];

    pub fn seconds(&self) -> i64 {
        const MIN: i64 = 60;
        const HOUR: i64 = 60 * MIN;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::M1 => MIN,
            Self::M3 => 3 * MIN,
            Self::M5 => 5 * MIN,
            Self::M15 => 15 * MIN,
            Self::M30 => 30 * MIN,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::D3 => 3 * DAY,
            Self::W1 => 7 * DAY,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Exchange interval label, e.g. `"15m"`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
        }
    }

    /// Snap an arbitrary cadence onto the ladder by absolute distance.
    /// An exact midpoint resolves to the shorter step.
    pub fn nearest(duration: Duration) -> TimeStep {
        let target = i128::from(duration.num_milliseconds());
        Self::ALL
            .iter()
            .copied()
            .min_by_key(|step| (i128::from(step.seconds()) * 1_000 - target).abs())
            .unwrap_or(Self::M1)
    }

    /// Floor `t` to the open time of the bucket that contains it.
    pub fn align(&self, t: Timestamp) -> Timestamp {
        let width = self.seconds() * 1_000_000;
        let offset = if *self == Self::W1 {
            WEEK_ALIGN_OFFSET_MICROS
        } else {
            0
        };
        let shifted = t.as_micros() - offset;
        let floored = shifted - shifted.rem_euclid(width) + offset;
        Timestamp::from_micros(floored).unwrap_or(Timestamp::MIN)
    }

    /// Close time of the bucket opening at `open`: one millisecond before the
    /// next bucket opens.
    pub fn candle_close(&self, open: Timestamp) -> Timestamp {
        open.saturating_add(self.duration() - Duration::milliseconds(1))
    }
}

impl std::fmt::Display for TimeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeStep {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.label() == wanted)
            .ok_or_else(|| FrameError::invalid(format!("unknown time step '{s}'")))
    }
}

impl Serialize for TimeStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for TimeStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ninety_seconds_snaps_to_one_minute() {
        assert_eq!(TimeStep::nearest(Duration::seconds(90)), TimeStep::M1);
    }

    #[test]
    fn every_midpoint_resolves_to_the_shorter_step() {
        for pair in TimeStep::ALL.windows(2) {
            let (short, long) = (pair[0], pair[1]);
            let mid_ms = (short.seconds() + long.seconds()) * 1_000 / 2;
            assert_eq!(TimeStep::nearest(Duration::milliseconds(mid_ms)), short);
            assert_eq!(TimeStep::nearest(Duration::milliseconds(mid_ms + 1)), long);
            assert_eq!(TimeStep::nearest(Duration::milliseconds(mid_ms - 1)), short);
        }
    }

    #[test]
    fn extremes_clamp_to_the_ladder_ends() {
        assert_eq!(TimeStep::nearest(Duration::zero()), TimeStep::M1);
        assert_eq!(TimeStep::nearest(Duration::seconds(-500)), TimeStep::M1);
        assert_eq!(TimeStep::nearest(Duration::days(365)), TimeStep::W1);
    }

    #[test]
    fn exact_durations_map_to_themselves() {
        for step in TimeStep::ALL {
            assert_eq!(TimeStep::nearest(step.duration()), step);
        }
    }

    #[test]
    fn labels_roundtrip() {
        for step in TimeStep::ALL {
            assert_eq!(step.label().parse::<TimeStep>().unwrap(), step);
        }
        assert!("2m".parse::<TimeStep>().is_err());
        let json = serde_json::to_string(&vec![TimeStep::H4, TimeStep::W1]).unwrap();
        assert_eq!(json, r#"["4h","1w"]"#);
    }

    #[test]
    fn steps_work_as_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert(TimeStep::H1, "hourly");
        assert_eq!(map.get(&TimeStep::nearest(Duration::minutes(61))), Some(&"hourly"));
    }

    #[test]
    fn align_floors_to_bucket_open() {
        let t = Timestamp::from_millis(1_700_000_123_456).unwrap();
        let open = TimeStep::M1.align(t);
        assert_eq!(open.as_millis() % 60_000, 0);
        assert!(open <= t && t.since(open) < Duration::minutes(1));
        assert_eq!(TimeStep::M1.candle_close(open).as_millis(), open.as_millis() + 59_999);
    }

    #[test]
    fn weekly_buckets_open_on_monday() {
        use chrono::{Datelike, Weekday};
        // 2023-11-14 is a Tuesday.
        let t = Timestamp::from_millis(1_700_000_000_000).unwrap();
        let open = TimeStep::W1.align(t).to_datetime();
        assert_eq!(open.weekday(), Weekday::Mon);
        assert_eq!(open.date_naive().to_string(), "2023-11-13");
    }
}
