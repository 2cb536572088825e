// =============================================================================
// Records: immutable market-data values stored in a Frame
// =============================================================================

pub mod candle;
pub mod decimal;
pub mod timestamp;
pub mod trade;

use std::fmt::Debug;

pub use candle::{Candle, RawCandle};
pub use timestamp::{IntoTimestamp, Timestamp};
pub use trade::{RawTrade, Trade};

use crate::error::{FrameError, FrameResult};

/// Contract shared by every record kind a [`Frame`](crate::frame::Frame) can hold.
pub trait Record: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Primary key; unique within a frame and defines iteration order.
    type Key: Copy + Ord + Debug + std::fmt::Display + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Instant the record starts at; the secondary (time) index is built on it.
    fn start(&self) -> Timestamp;

    /// Instant the record ends at. Point-in-time records end where they start.
    fn end(&self) -> Timestamp {
        self.start()
    }

    /// Merge policy for a key collision where `self` is the left operand:
    /// `true` keeps `self`, `false` replaces it with `other`.
    fn supersedes(&self, other: &Self) -> bool;
}

/// A caller-supplied value that can be validated into a primary key.
pub trait KeyInput<K> {
    fn into_key(self) -> FrameResult<K>;
}

impl KeyInput<u64> for u64 {
    fn into_key(self) -> FrameResult<u64> {
        Ok(self)
    }
}

macro_rules! checked_id_input {
    ($($ty:ty),*) => {
        $(
            impl KeyInput<u64> for $ty {
                fn into_key(self) -> FrameResult<u64> {
                    u64::try_from(self).map_err(|_| {
                        FrameError::range(format!("id {self} is outside the unsigned 64-bit range"))
                    })
                }
            }
        )*
    };
}

checked_id_input!(u32, i32, i64, i128);

impl<T: IntoTimestamp> KeyInput<Timestamp> for T {
    fn into_key(self) -> FrameResult<Timestamp> {
        self.into_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_oversized_ids_are_range_errors() {
        assert_eq!(KeyInput::<u64>::into_key(7_i32), Ok(7));
        assert!(matches!(KeyInput::<u64>::into_key(-1_i64), Err(FrameError::Range(_))));
        let too_big = i128::from(u64::MAX) + 1;
        assert!(matches!(KeyInput::<u64>::into_key(too_big), Err(FrameError::Range(_))));
    }

    #[test]
    fn time_keys_normalize_any_representation() {
        let key: Timestamp = KeyInput::<Timestamp>::into_key(60_000_i64).unwrap();
        assert_eq!(key.as_millis(), 60_000);
    }
}
