//! Storage-assigned timestamps.
//!
//! Every write, update, delete, or read against a document store yields a
//! [`StorageTimestamp`]. The cache uses these tokens, and only these tokens, to
//! decide whether an incoming write is newer than what it already holds.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Opaque, totally ordered write/read token: `(seconds, microseconds)`.
///
/// Ordering is lexicographic on the two fields, which the derived `Ord`
/// provides because `seconds` is declared first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageTimestamp {
    seconds: i64,
    microseconds: u32,
}

impl StorageTimestamp {
    /// Build a timestamp, carrying whole seconds out of `microseconds`.
    pub fn new(seconds: i64, microseconds: u32) -> Self {
        let carry = i64::from(microseconds) / MICROS_PER_SECOND;
        Self {
            seconds: seconds + carry,
            microseconds: (i64::from(microseconds) % MICROS_PER_SECOND) as u32,
        }
    }

    /// Convert a store-native instant, rounding nanoseconds to the nearest
    /// microsecond.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let micros = (at.timestamp_subsec_nanos() + 500) / 1_000;
        Self::new(at.timestamp(), micros)
    }

    /// Rebuild a timestamp from a flat microsecond count since the epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self {
            seconds: micros.div_euclid(MICROS_PER_SECOND),
            microseconds: micros.rem_euclid(MICROS_PER_SECOND) as u32,
        }
    }

    /// Flat microsecond count since the epoch.
    pub fn as_micros(&self) -> i64 {
        self.seconds * MICROS_PER_SECOND + i64::from(self.microseconds)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn microseconds(&self) -> u32 {
        self.microseconds
    }
}

impl fmt::Display for StorageTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.seconds, self.microseconds)
    }
}

// ── clock ────────────────────────────────────────────────────────────

/// Strictly increasing timestamp source for the bundled document stores.
///
/// Follows the wall clock, but never hands out the same or an older value
/// twice, so two writes serialized by a store always receive distinct,
/// correctly ordered timestamps.
#[derive(Debug, Default)]
pub struct StorageClock {
    last_micros: AtomicI64,
}

impl StorageClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next timestamp.
    pub fn tick(&self) -> StorageTimestamp {
        let wall = Utc::now().timestamp_micros();
        let mut last = self.last_micros.load(Ordering::Acquire);
        loop {
            let next = wall.max(last + 1);
            match self.last_micros.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return StorageTimestamp::from_micros(next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Ensure future ticks are strictly after `seen` (used when reopening a
    /// persistent store whose last write may be ahead of the wall clock).
    pub fn observe(&self, seen: StorageTimestamp) {
        self.last_micros
            .fetch_max(seen.as_micros(), Ordering::AcqRel);
    }
}
