// =============================================================================
// Frame: immutable, key-ordered, key-unique collection of records
// =============================================================================
//
// Two indexes are built once, at construction:
//   - primary:   BTreeMap<Key, Record>            (point lookup, key order)
//   - secondary: BTreeMap<start time, [Key]>       (time lookup, time slicing)
//
// Slicing by time is O(log n + k): the scan starts `max_span` before the
// lower bound so that long records which began earlier but still overlap the
// window are found without a full pass.
//
// A Frame never changes after construction. Set algebra lives in
// `algebra.rs`; record-kind specific helpers in `trades.rs` / `candles.rs`.
// =============================================================================

pub mod algebra;
pub mod candles;
pub mod trades;

use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::ops::Bound;

use chrono::Duration;
use serde::{Serialize, Serializer};

use crate::error::{FrameError, FrameResult};
use crate::records::{Candle, IntoTimestamp, KeyInput, Record, Timestamp, Trade};
use crate::time::TimeInterval;

pub type TradeFrame = Frame<Trade>;
pub type CandleFrame = Frame<Candle>;

/// An immutable, key-ordered set of records.
#[derive(Debug, Clone)]
pub struct Frame<R: Record> {
    records: BTreeMap<R::Key, R>,
    by_start: BTreeMap<Timestamp, Vec<R::Key>>,
    max_span: Duration,
    latest_end: Option<Timestamp>,
}

/// Result of a secondary (time) lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<R: Record> {
    /// Exactly one record starts at the requested instant.
    One(R),
    /// Several records share the instant.
    Many(Frame<R>),
}

impl<R: Record> Lookup<R> {
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(frame) => frame.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_frame(self) -> Frame<R> {
        match self {
            Self::One(record) => Frame::from_records([record]),
            Self::Many(frame) => frame,
        }
    }
}

impl<R: Record> Frame<R> {
    pub fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            by_start: BTreeMap::new(),
            max_span: Duration::zero(),
            latest_end: None,
        }
    }

    /// Build a frame from records in any order. Records sharing a key are
    /// resolved by the record kind's merge policy, earlier records acting as
    /// the left operand.
    pub fn from_records<I: IntoIterator<Item = R>>(records: I) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            match map.entry(record.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if !slot.get().supersedes(&record) {
                        slot.insert(record);
                    }
                }
            }
        }
        Self::from_map(map)
    }

    /// Normalize transport rows and build a frame; the first invalid row
    /// aborts the whole batch.
    pub fn try_from_raw<I, T>(raw: I) -> FrameResult<Self>
    where
        I: IntoIterator<Item = T>,
        R: TryFrom<T, Error = FrameError>,
    {
        let records = raw
            .into_iter()
            .map(R::try_from)
            .collect::<FrameResult<Vec<R>>>()?;
        Ok(Self::from_records(records))
    }

    pub(crate) fn from_map(records: BTreeMap<R::Key, R>) -> Self {
        let mut by_start: BTreeMap<Timestamp, Vec<R::Key>> = BTreeMap::new();
        let mut max_span = Duration::zero();
        let mut latest_end: Option<Timestamp> = None;
        for (key, record) in &records {
            by_start.entry(record.start()).or_default().push(*key);
            max_span = max_span.max(record.end().since(record.start()));
            latest_end = latest_end.max(Some(record.end()));
        }
        Self {
            records,
            by_start,
            max_span,
            latest_end,
        }
    }

    // ── Size & traversal ──────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fresh key-ascending traversal; every call starts from the beginning.
    pub fn iter(&self) -> btree_map::Values<'_, R::Key, R> {
        self.records.values()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, R::Key, R> {
        self.records.keys()
    }

    pub fn first(&self) -> Option<&R> {
        self.records.values().next()
    }

    pub fn last(&self) -> Option<&R> {
        self.records.values().next_back()
    }

    pub fn min_key(&self) -> Option<R::Key> {
        self.records.keys().next().copied()
    }

    pub fn max_key(&self) -> Option<R::Key> {
        self.records.keys().next_back().copied()
    }

    /// Earliest start over all records.
    pub fn start_time(&self) -> Option<Timestamp> {
        self.by_start.keys().next().copied()
    }

    /// Latest end over all records.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.latest_end
    }

    /// Record with the most recent start; the highest key wins among equals.
    pub fn latest(&self) -> Option<&R> {
        let (_, keys) = self.by_start.iter().next_back()?;
        keys.iter().max().and_then(|key| self.records.get(key))
    }

    // ── Lookup ────────────────────────────────────────────────────────────

    /// Exact primary-key lookup.
    pub fn get<Q: KeyInput<R::Key>>(&self, key: Q) -> FrameResult<&R> {
        let key = key.into_key()?;
        self.records
            .get(&key)
            .ok_or_else(|| FrameError::not_found(format!("no record with key {key}")))
    }

    /// Lookup by start time. One match yields the record, several a sub-frame.
    pub fn get_by_secondary<T: IntoTimestamp>(&self, time: T) -> FrameResult<Lookup<R>> {
        let time = time.into_timestamp()?;
        let keys = self
            .by_start
            .get(&time)
            .ok_or_else(|| FrameError::not_found(format!("no record starts at {time}")))?;
        match keys.as_slice() {
            [only] => self
                .records
                .get(only)
                .cloned()
                .map(Lookup::One)
                .ok_or_else(|| FrameError::not_found(format!("no record starts at {time}"))),
            many => Ok(Lookup::Many(Self::from_records(
                many.iter().filter_map(|key| self.records.get(key)).cloned(),
            ))),
        }
    }

    pub fn contains_key<Q: KeyInput<R::Key>>(&self, key: Q) -> bool {
        key.into_key()
            .map(|key| self.records.contains_key(&key))
            .unwrap_or(false)
    }

    /// Whether an equal record (by value, not only by key) is present.
    pub fn contains_record(&self, record: &R) -> bool {
        self.records
            .get(&record.key())
            .is_some_and(|held| held == record)
    }

    /// Whether any record's `[start, end]` covers `time`.
    pub fn contains_time<T: IntoTimestamp>(&self, time: T) -> bool {
        match time.into_timestamp() {
            Ok(t) => self.overlapping(Some(t), Some(t)).next().is_some(),
            Err(_) => false,
        }
    }

    // ── Slicing ───────────────────────────────────────────────────────────

    /// Every record whose `[start, end]` intersects `[lower, upper]`, both
    /// bounds inclusive; a missing bound is unbounded.
    pub fn slice(&self, lower: Option<Timestamp>, upper: Option<Timestamp>) -> Self {
        if self.is_empty() {
            return Self::empty();
        }
        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return Self::empty();
            }
        }
        let map = self
            .overlapping(lower, upper)
            .map(|record| (record.key(), record.clone()))
            .collect();
        Self::from_map(map)
    }

    pub fn slice_interval(&self, interval: &TimeInterval) -> Self {
        self.slice(interval.start(), interval.end())
    }

    /// Every record whose key lies in `[lower, upper]`, both inclusive.
    pub fn slice_keys(&self, lower: Option<R::Key>, upper: Option<R::Key>) -> Self {
        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return Self::empty();
            }
        }
        let lo = lower.map_or(Bound::Unbounded, Bound::Included);
        let hi = upper.map_or(Bound::Unbounded, Bound::Included);
        let map = self
            .records
            .range((lo, hi))
            .map(|(k, r)| (*k, r.clone()))
            .collect();
        Self::from_map(map)
    }

    pub fn filter<F: Fn(&R) -> bool>(&self, keep: F) -> Self {
        let map = self
            .records
            .iter()
            .filter(|(_, r)| keep(r))
            .map(|(k, r)| (*k, r.clone()))
            .collect();
        Self::from_map(map)
    }

    /// Callers guarantee `lower <= upper` when both are present.
    fn overlapping(
        &self,
        lower: Option<Timestamp>,
        upper: Option<Timestamp>,
    ) -> impl Iterator<Item = &R> + '_ {
        let scan_from = lower.map_or(Bound::Unbounded, |l| {
            Bound::Included(l.saturating_sub(self.max_span))
        });
        let scan_to = upper.map_or(Bound::Unbounded, Bound::Included);
        self.by_start
            .range((scan_from, scan_to))
            .flat_map(|(_, keys)| keys.iter())
            .filter_map(|key| self.records.get(key))
            .filter(move |r| {
                lower.map_or(true, |l| r.end() >= l) && upper.map_or(true, |u| r.start() <= u)
            })
    }
}

impl<R: Record> Default for Frame<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: Record> PartialEq for Frame<R> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .records
                .iter()
                .zip(other.records.iter())
                .all(|((ka, a), (kb, b))| ka == kb && a == b)
    }
}

impl<R: Record> FromIterator<R> for Frame<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

impl<'a, R: Record> IntoIterator for &'a Frame<R> {
    type Item = &'a R;
    type IntoIter = btree_map::Values<'a, R::Key, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<R: Record + Serialize> Serialize for Frame<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{minute_candle, trade, trades};
    use rust_decimal_macros::dec;

    fn ms(v: i64) -> Timestamp {
        Timestamp::from_millis(v).unwrap()
    }

    #[test]
    fn iteration_is_key_ascending_and_restartable() {
        let frame = trades(&[(30, 1_000), (10, 3_000), (20, 2_000)]);
        let first: Vec<u64> = frame.iter().map(|t| t.id()).collect();
        let second: Vec<u64> = frame.iter().map(|t| t.id()).collect();
        assert_eq!(first, vec![10, 20, 30]);
        assert_eq!(first, second);
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn duplicate_keys_collapse_by_policy() {
        let frame = Frame::from_records([
            trade(1, 1_000, dec!(10)),
            trade(1, 1_000, dec!(11)),
            trade(2, 2_000, dec!(12)),
        ]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.get(1_u64).unwrap().price(), dec!(10));
    }

    #[test]
    fn get_reports_not_found_and_range() {
        let frame = trades(&[(10, 1_000)]);
        assert_eq!(frame.get(10_u64).unwrap().id(), 10);
        assert!(matches!(frame.get(11_u64), Err(FrameError::NotFound(_))));
        assert!(matches!(frame.get(-1_i64), Err(FrameError::Range(_))));
        assert!(frame.contains_key(10_i32));
        assert!(!frame.contains_key(-10_i32));
    }

    #[test]
    fn candle_get_accepts_any_time_representation() {
        let frame: CandleFrame = (0..3).map(|m| minute_candle(m, dec!(100), 5, dec!(1))).collect();
        let by_millis = frame.get(60_000_i64).unwrap();
        let by_secs = frame.get(60.0_f64).unwrap();
        assert_eq!(by_millis, by_secs);
        assert!(matches!(frame.get(30_000_i64), Err(FrameError::NotFound(_))));
        assert!(matches!(frame.get(f64::INFINITY), Err(FrameError::Range(_))));
    }

    #[test]
    fn secondary_lookup_returns_one_or_many() {
        let frame = trades(&[(1, 1_000), (2, 2_000), (3, 2_000)]);
        match frame.get_by_secondary(1_000_i64).unwrap() {
            Lookup::One(t) => assert_eq!(t.id(), 1),
            other => panic!("expected single record, got {other:?}"),
        }
        match frame.get_by_secondary(2_000_i64).unwrap() {
            Lookup::Many(sub) => assert_eq!(sub.keys().copied().collect::<Vec<_>>(), vec![2, 3]),
            other => panic!("expected sub-frame, got {other:?}"),
        }
        assert!(matches!(frame.get_by_secondary(5_000_i64), Err(FrameError::NotFound(_))));
    }

    #[test]
    fn slice_bounds_are_inclusive() {
        let frame = trades(&[(1, 1_000), (2, 2_000), (3, 3_000), (4, 4_000)]);
        let mid = frame.slice(Some(ms(2_000)), Some(ms(3_000)));
        assert_eq!(mid.keys().copied().collect::<Vec<_>>(), vec![2, 3]);

        let tail = frame.slice(Some(ms(3_000)), None);
        assert_eq!(tail.len(), 2);
        let head = frame.slice(None, Some(ms(1_000)));
        assert_eq!(head.len(), 1);
        assert!(frame.slice(Some(ms(5_000)), Some(ms(1_000))).is_empty());
    }

    #[test]
    fn whole_range_slice_is_an_equal_copy() {
        let frame = trades(&[(1, 1_000), (2, 2_000), (3, 3_000)]);
        let whole = frame.slice(frame.start_time(), frame.end_time());
        assert_eq!(whole, frame);
        let by_keys = frame.slice_keys(frame.min_key(), frame.max_key());
        assert_eq!(by_keys, frame);
        let single = frame.slice_keys(Some(2), Some(2));
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn empty_frame_slices_to_empty() {
        let frame = TradeFrame::empty();
        assert!(frame.slice(None, None).is_empty());
        assert!(frame.slice(Some(ms(0)), Some(ms(10))).is_empty());
        assert!(frame.latest().is_none());
        assert_eq!(frame.end_time(), None);
    }

    #[test]
    fn candle_slice_uses_interval_overlap() {
        let frame: CandleFrame = (0..5).map(|m| minute_candle(m, dec!(100), 5, dec!(1))).collect();
        // 90s falls inside the candle that opened at 60s.
        let hit = frame.slice(Some(ms(90_000)), Some(ms(90_000)));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit.first().unwrap().open_time(), ms(60_000));

        // Window touching the close of minute 1 and the open of minute 2.
        let pair = frame.slice(Some(ms(119_999)), Some(ms(120_000)));
        assert_eq!(pair.len(), 2);

        assert!(frame.contains_time(299_999_i64));
        assert!(!frame.contains_time(300_000_i64));
    }

    #[test]
    fn latest_tracks_start_time_not_key() {
        let frame = trades(&[(1, 5_000), (2, 1_000)]);
        assert_eq!(frame.latest().unwrap().id(), 1);
        assert_eq!(frame.last().unwrap().id(), 2);
    }

    #[test]
    fn contains_record_compares_by_value() {
        let frame = trades(&[(1, 1_000)]);
        assert!(frame.contains_record(&trade(1, 1_000, dec!(100))));
        assert!(!frame.contains_record(&trade(1, 1_000, dec!(101))));
    }

    #[test]
    fn try_from_raw_rejects_whole_batch() {
        let mut bad = crate::testkit::raw_trade(2, 2_000_i64, dec!(1));
        bad.price = dec!(-1);
        let batch = vec![crate::testkit::raw_trade(1, 1_000_i64, dec!(1)), bad];
        assert!(TradeFrame::try_from_raw(batch).is_err());
    }

    #[test]
    fn serializes_as_ordered_sequence() {
        let frame = trades(&[(2, 2_000), (1, 1_000)]);
        let json = serde_json::to_value(&frame).unwrap();
        let ids: Vec<u64> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
