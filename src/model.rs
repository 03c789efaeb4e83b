// SPDX-License-Identifier: Apache-2.0, MIT

//! The device-state record shape: a timestamped bundle of metrics
//! published by a single device, per the data model of spec.md §3.

use serde::{Deserialize, Serialize};

/// A single metric observation within a [`DevState`].
///
/// `timestamp` is set only for "slow" metrics whose source observed the
/// value asynchronously from the record's capture instant; most metrics
/// leave it `None` and inherit the record's own `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: u32,
    pub status: i32,
    pub value: i32,
    pub scale: i32,
    pub timestamp: Option<u32>,
}

impl Metric {
    /// The metric's real value, `value * 10^scale`.
    pub fn real_value(&self) -> f64 {
        self.value as f64 * 10f64.powi(self.scale)
    }
}

/// A device's published state: a capture-time timestamp plus the set of
/// metrics observed at that time. Metric ids within a record are unique
/// (spec.md §3); this is a caller responsibility, not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevState {
    pub devid: u32,
    pub timestamp: u32,
    pub metrics: Vec<Metric>,
}

impl DevState {
    pub fn metric(&self, id: u32) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

/// A metric value resolved by the projection engine (spec.md §4.8), tagged
/// with the ticktime of the record it was found in.
///
/// `ticktime` is milliseconds since the epoch (spec.md §3: the record
/// filename is `floor(ticktime_ms / 1000)`), distinct from the record's
/// own `timestamp`, which is acquisition wall-clock in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetric {
    pub id: u32,
    pub status: i32,
    pub value: i32,
    pub scale: i32,
    pub timestamp: Option<u32>,
    /// The ticktime (milliseconds since epoch) of the record this value
    /// was read from.
    pub ticktime: u64,
}

/// The last-good-value snapshot for a device (spec.md §3's `fm:lgv:<devid>`
/// hash, decoded into a concrete shape for callers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastGoodValue {
    pub last_ticktime: Option<u64>,
    pub metrics: Vec<ResolvedMetric>,
}
