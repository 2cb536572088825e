// =============================================================================
// TimeInterval: a closed, possibly unbounded range of instants
// =============================================================================
//
// Either bound may be absent (unbounded on that side). An interval may be
// tagged with the TimeStep of the candles it asks for; only intervals with
// the same tag may be unioned. Mixing tags is a programming error and panics.
// =============================================================================

use chrono::Duration;
use serde::Serialize;

use crate::error::{FrameError, FrameResult};
use crate::records::{IntoTimestamp, Timestamp};
use crate::time::TimeStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeInterval {
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    step: Option<TimeStep>,
}

impl TimeInterval {
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> FrameResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(FrameError::InvalidInterval {
                    start: s.to_string(),
                    end: e.to_string(),
                });
            }
        }
        Ok(Self {
            start,
            end,
            step: None,
        })
    }

    /// Bounded interval from any two timestamp representations.
    pub fn between(start: impl IntoTimestamp, end: impl IntoTimestamp) -> FrameResult<Self> {
        Self::new(Some(start.into_timestamp()?), Some(end.into_timestamp()?))
    }

    /// Everything from `start` onwards.
    pub fn since(start: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: None,
            step: None,
        }
    }

    /// The trailing `lookback` window ending at `now`, open on the right.
    pub fn trailing(now: Timestamp, lookback: Duration) -> Self {
        Self::since(now.saturating_sub(lookback))
    }

    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
            step: None,
        }
    }

    pub fn with_step(mut self, step: TimeStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn start(&self) -> Option<Timestamp> {
        self.start
    }

    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    pub fn step(&self) -> Option<TimeStep> {
        self.step
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start.map_or(true, |s| s <= t) && self.end.map_or(true, |e| t <= e)
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        let starts_before_other_ends = match (self.start, other.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        };
        let ends_after_other_starts = match (self.end, other.start) {
            (Some(e), Some(s)) => e >= s,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }

    /// Overlapping, or separated by no more than one step width (one
    /// microsecond when the interval carries no step).
    pub fn touches(&self, other: &TimeInterval) -> bool {
        if self.overlaps(other) {
            return true;
        }
        let slack = self
            .step
            .map_or_else(|| Duration::microseconds(1), |s| s.duration());
        let gap = match (self.end, other.start) {
            (Some(e), Some(s)) if e < s => s.since(e),
            _ => match (other.end, self.start) {
                (Some(e), Some(s)) => s.since(e),
                _ => return true,
            },
        };
        gap <= slack
    }

    /// Convex union of two ranges.
    ///
    /// # Panics
    /// If the two intervals carry different steps.
    pub fn union(&self, other: &TimeInterval) -> TimeInterval {
        assert!(
            self.step == other.step,
            "contract violation: cannot union intervals tagged {:?} and {:?}",
            self.step,
            other.step
        );
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        TimeInterval {
            start,
            end,
            step: self.step,
        }
    }

    /// Common part of two ranges, if any. Keeps `self`'s step.
    pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
        if !self.overlaps(other) {
            return None;
        }
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Some(TimeInterval {
            start,
            end,
            step: self.step,
        })
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.start {
            Some(s) => write!(f, "[{s}, ")?,
            None => write!(f, "[-inf, ")?,
        }
        match self.end {
            Some(e) => write!(f, "{e}]")?,
            None => write!(f, "+inf]")?,
        }
        if let Some(step) = self.step {
            write!(f, "@{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: i64) -> Timestamp {
        Timestamp::from_millis(v).unwrap()
    }

    fn iv(a: i64, b: i64) -> TimeInterval {
        TimeInterval::between(a, b).unwrap()
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(matches!(
            TimeInterval::between(10_i64, 5_i64),
            Err(FrameError::InvalidInterval { .. })
        ));
        assert!(TimeInterval::between(5_i64, 5_i64).is_ok());
    }

    #[test]
    fn union_is_the_convex_hull() {
        let u = iv(0, 10).union(&iv(20, 30));
        assert_eq!(u.start(), Some(ms(0)));
        assert_eq!(u.end(), Some(ms(30)));

        let open = TimeInterval::since(ms(15)).union(&iv(0, 10));
        assert_eq!(open.start(), Some(ms(0)));
        assert_eq!(open.end(), None);
    }

    #[test]
    fn union_keeps_shared_step() {
        let a = iv(0, 60_000).with_step(TimeStep::M1);
        let b = iv(120_000, 180_000).with_step(TimeStep::M1);
        assert_eq!(a.union(&b).step(), Some(TimeStep::M1));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn union_with_mismatched_steps_panics() {
        let a = iv(0, 10).with_step(TimeStep::M1);
        let b = iv(0, 10).with_step(TimeStep::M3);
        let _ = a.union(&b);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn union_of_tagged_and_untagged_panics() {
        let _ = iv(0, 10).with_step(TimeStep::H1).union(&iv(0, 10));
    }

    #[test]
    fn containment_is_inclusive() {
        let i = iv(10, 20);
        assert!(i.contains(ms(10)));
        assert!(i.contains(ms(20)));
        assert!(!i.contains(ms(21)));
        assert!(TimeInterval::unbounded().contains(Timestamp::MIN));
    }

    #[test]
    fn overlap_and_touch() {
        assert!(iv(0, 10).overlaps(&iv(10, 20)));
        assert!(!iv(0, 10).overlaps(&iv(11, 20)));
        assert!(!iv(0, 10).touches(&iv(11, 20)));

        let a = iv(0, 59_999).with_step(TimeStep::M1);
        let b = iv(60_000, 119_999).with_step(TimeStep::M1);
        let far = iv(600_000, 659_999).with_step(TimeStep::M1);
        assert!(a.touches(&b));
        assert!(b.touches(&a));
        assert!(!a.touches(&far));
        assert!(!TimeInterval::since(ms(5)).touches(&iv(0, 1)));
        let next_micro = TimeInterval::since(Timestamp::from_micros(1_001).unwrap());
        assert!(next_micro.touches(&iv(0, 1)));
    }

    #[test]
    fn intersect_clips_to_common_part() {
        let i = iv(0, 10).intersect(&TimeInterval::since(ms(5))).unwrap();
        assert_eq!((i.start(), i.end()), (Some(ms(5)), Some(ms(10))));
        assert!(iv(0, 4).intersect(&iv(5, 9)).is_none());
    }

    #[test]
    fn display_marks_open_ends() {
        let s = TimeInterval::since(ms(0)).with_step(TimeStep::D1).to_string();
        assert!(s.ends_with("+inf]@1d"), "{s}");
    }
}
