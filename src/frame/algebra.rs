// =============================================================================
// Frame set algebra: union / intersection / difference
// =============================================================================
//
// Every operation returns a new Frame; operands are never touched.
//
//   union         merge by key; collisions resolved by Record::supersedes
//                 with `self` as the left operand
//   intersection  records present in both frames by full value equality
//   difference    records of `self` whose exact value is absent from `other`
// =============================================================================

use std::collections::btree_map::Entry;
use std::ops::{BitAnd, BitOr, Sub};

use super::Frame;
use crate::records::Record;

impl<R: Record> Frame<R> {
    pub fn union(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged = self.records.clone();
        for (key, incoming) in &other.records {
            match merged.entry(*key) {
                Entry::Vacant(slot) => {
                    slot.insert(incoming.clone());
                }
                Entry::Occupied(mut slot) => {
                    if !slot.get().supersedes(incoming) {
                        slot.insert(incoming.clone());
                    }
                }
            }
        }
        Self::from_map(merged)
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let map = small
            .records
            .iter()
            .filter(|(key, record)| large.records.get(*key).is_some_and(|r| r == *record))
            .map(|(key, record)| (*key, record.clone()))
            .collect();
        Self::from_map(map)
    }

    pub fn difference(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        self.filter(|record| !other.contains_record(record))
    }

    /// Whether every record of `self` is present, by value, in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|record| other.contains_record(record))
    }
}

impl<R: Record> BitOr for &Frame<R> {
    type Output = Frame<R>;

    fn bitor(self, rhs: Self) -> Frame<R> {
        self.union(rhs)
    }
}

impl<R: Record> BitAnd for &Frame<R> {
    type Output = Frame<R>;

    fn bitand(self, rhs: Self) -> Frame<R> {
        self.intersection(rhs)
    }
}

impl<R: Record> Sub for &Frame<R> {
    type Output = Frame<R>;

    fn sub(self, rhs: Self) -> Frame<R> {
        self.difference(rhs)
    }
}
