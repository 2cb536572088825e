// =============================================================================
// Candle-frame helpers: closes, extremes and coverage gaps
// =============================================================================

use rust_decimal::Decimal;

use super::CandleFrame;
use crate::records::Timestamp;
use crate::time::{TimeInterval, TimeStep};

impl CandleFrame {
    pub fn last_close(&self) -> Option<Decimal> {
        self.last().map(|c| c.close())
    }

    pub fn highest(&self) -> Option<Decimal> {
        self.iter().map(|c| c.high()).max()
    }

    pub fn lowest(&self) -> Option<Decimal> {
        self.iter().map(|c| c.low()).min()
    }

    /// Ranges of `interval` not covered by a candle of width `step`, each
    /// tagged with `step` and spanning whole buckets. Consecutive missing
    /// buckets collapse into one range.
    ///
    /// Only present buckets are visited. An interval open on either side
    /// cannot be enumerated and is returned whole.
    pub fn gaps(&self, interval: &TimeInterval, step: TimeStep) -> Vec<TimeInterval> {
        let (Some(start), Some(end)) = (interval.start(), interval.end()) else {
            return vec![interval.with_step(step)];
        };

        let mut gaps = Vec::new();
        let mut cursor = step.align(start);
        let present = self
            .records
            .range(cursor..=end)
            .map(|(open, _)| *open)
            .filter(|open| step.align(*open) == *open);
        for open in present {
            if open > cursor {
                if let Some(last) = open.checked_sub(step.duration()) {
                    gaps.extend(bucket_range(cursor, last, step));
                }
            }
            match open.checked_add(step.duration()) {
                Some(next) => cursor = next,
                None => return gaps,
            }
        }
        if cursor <= end {
            gaps.extend(bucket_range(cursor, step.align(end), step));
        }
        gaps
    }
}

/// `[first open, last close]` for a run of missing buckets.
fn bucket_range(first: Timestamp, last: Timestamp, step: TimeStep) -> Option<TimeInterval> {
    TimeInterval::new(Some(first), Some(step.candle_close(last)))
        .ok()
        .map(|iv| iv.with_step(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::minute_candle;
    use rust_decimal_macros::dec;

    fn frame_with_minutes(minutes: &[i64]) -> CandleFrame {
        minutes
            .iter()
            .map(|&m| minute_candle(m, Decimal::from(m + 100), 1, dec!(1)))
            .collect()
    }

    fn window(from_min: i64, to_min: i64) -> TimeInterval {
        TimeInterval::between(from_min * 60_000, to_min * 60_000 - 1).unwrap()
    }

    #[test]
    fn closes_and_extremes() {
        let frame = frame_with_minutes(&[0, 1, 2]);
        assert_eq!(frame.last_close(), Some(dec!(102)));
        assert_eq!(frame.highest(), Some(dec!(102)));
        assert_eq!(frame.lowest(), Some(dec!(100)));
    }

    #[test]
    fn full_coverage_has_no_gaps() {
        let frame = frame_with_minutes(&[0, 1, 2, 3]);
        assert!(frame.gaps(&window(0, 4), TimeStep::M1).is_empty());
    }

    #[test]
    fn missing_runs_collapse() {
        let frame = frame_with_minutes(&[0, 3, 4]);
        let gaps = frame.gaps(&window(0, 7), TimeStep::M1);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0], window(1, 3).with_step(TimeStep::M1));
        assert_eq!(gaps[1], window(5, 7).with_step(TimeStep::M1));
    }

    #[test]
    fn unaligned_start_covers_the_enclosing_bucket() {
        let frame = CandleFrame::empty();
        let iv = TimeInterval::between(90_000_i64, 150_000_i64).unwrap();
        let gaps = frame.gaps(&iv, TimeStep::M1);
        assert_eq!(gaps, vec![window(1, 3).with_step(TimeStep::M1)]);
    }

    #[test]
    fn wide_window_is_walked_by_present_buckets() {
        let frame = frame_with_minutes(&[0, 1, 5]);
        let two_centuries = TimeInterval::between(0_i64, 200 * 365 * 86_400_000_i64).unwrap();

        let started = std::time::Instant::now();
        let gaps = frame.gaps(&two_centuries, TimeStep::M1);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0], window(2, 5).with_step(TimeStep::M1));
        assert_eq!(gaps[1].start().map(|t| t.as_millis()), Some(6 * 60_000));
        assert_eq!(gaps[1].end(), two_centuries.end().map(|t| TimeStep::M1.candle_close(TimeStep::M1.align(t))));

        let empty = CandleFrame::empty().gaps(&two_centuries, TimeStep::M1);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn open_interval_is_one_gap() {
        let frame = frame_with_minutes(&[0]);
        let since = TimeInterval::since(Timestamp::EPOCH);
        assert_eq!(frame.gaps(&since, TimeStep::H1), vec![since.with_step(TimeStep::H1)]);
    }
}
