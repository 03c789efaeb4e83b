// SPDX-License-Identifier: Apache-2.0, MIT

//! A block-bucketed, archive-capable time-series store for device state
//! records: write a [`model::DevState`] at a caller-chosen ticktime,
//! project the freshest value of any metric as of a reference instant,
//! and let housekeeping prune stale blocks and pack aged ones into
//! compressed archives.

pub mod archiver;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod index;
pub mod index_store;
pub mod loader;
pub mod logging;
pub mod model;
pub mod paths;
pub mod projection;
pub mod store;
pub mod writer;

pub use error::{ArchiveError, Result, StoreError};
pub use model::{DevState, LastGoodValue, Metric, ResolvedMetric};
pub use store::DeviceStateStore;
