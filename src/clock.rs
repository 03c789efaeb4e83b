// SPDX-License-Identifier: Apache-2.0, MIT

//! C1 — Block Clock: maps an instant to an integer block index.
//!
//! `blockHours` is read once from configuration at store construction and
//! is immutable for the life of the store (spec.md §4.1); callers cannot
//! change it mid-flight, matching the teacher's `RocksDbConfig`-style
//! "configured once, used forever" shape.

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Block index: an integer `YYYYMMDDHH'` where `HH' = floor(hour /
/// block_hours)`.
pub type BlockIndex = i64;

#[derive(Debug, Clone, Copy)]
pub struct BlockClock {
    block_hours: u32,
}

impl BlockClock {
    /// `block_hours` must be in `[1, 24]`; out-of-range values are clamped
    /// by the caller (see [`crate::config::StoreConfig`]), not here — this
    /// type assumes it has already been validated.
    pub fn new(block_hours: u32) -> Self {
        debug_assert!((1..=24).contains(&block_hours));
        Self { block_hours }
    }

    pub fn block_hours(&self) -> u32 {
        self.block_hours
    }

    /// `blockIndex(t) = year*1_000_000 + month*10_000 + day*100 +
    /// floor(hour/blockHours)`, computed in UTC. Total and monotone
    /// non-decreasing in `t`.
    pub fn block_index(&self, t: DateTime<Utc>) -> BlockIndex {
        let year = t.year() as i64;
        let month = t.month() as i64;
        let day = t.day() as i64;
        let bucket = (t.hour() / self.block_hours) as i64;
        year * 1_000_000 + month * 10_000 + day * 100 + bucket
    }

    /// Convenience: block index of a ticktime given in milliseconds since
    /// the epoch.
    pub fn block_index_of_ticktime_ms(&self, ticktime_ms: u64) -> BlockIndex {
        let secs = (ticktime_ms / 1000) as i64;
        let t = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_else(|| Utc::now());
        self.block_index(t)
    }
}
