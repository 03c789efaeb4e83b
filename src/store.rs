// SPDX-License-Identifier: Apache-2.0, MIT

//! Top-level facade tying C1–C9 together into the public API a
//! collaborator (acquisition scheduler, CLI) calls (spec.md §4, "CLI
//! surface" line): `putDeviceState`, `projectMetrics`,
//! `getDeviceTimeSpan`, `getDeviceLastGoodValue`, `housekeeping`.
//!
//! Grounded in the teacher's own top-level `Store` trait (`lib.rs`),
//! which plays the same role of a single entry point delegating to
//! backend-specific pieces — here the backend is this crate's own
//! C1–C9 pipeline rather than an external KV engine.

use crate::archiver::Archiver;
use crate::clock::BlockClock;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::index::IndexKeeper;
use crate::index_store::{IndexStore, SledIndexStore};
use crate::housekeeping::Housekeeping;
use crate::model::{DevState, LastGoodValue, ResolvedMetric};
use crate::paths::PathResolver;
use crate::projection::ProjectionEngine;
use crate::writer::StateWriter;

/// The device-state store: the library's single entry point.
pub struct DeviceStateStore<S: IndexStore> {
    clock: BlockClock,
    writer: StateWriter,
    keeper: IndexKeeper<S>,
    archiver: Archiver,
    projection: ProjectionEngine,
    housekeeping: Housekeeping,
}

impl DeviceStateStore<SledIndexStore> {
    /// Builds a store whose index lives in a `sled` database under
    /// `config.data_root`.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let index_path = config.data_root.join("index.sled");
        let index_store = SledIndexStore::open(index_path)?;
        Ok(Self::with_index_store(config, index_store))
    }
}

impl<S: IndexStore> DeviceStateStore<S> {
    pub fn with_index_store(config: &StoreConfig, index_store: S) -> Self {
        let paths = PathResolver::new(config.data_root.clone());
        let clock = BlockClock::new(config.hours_per_block);
        Self {
            clock,
            writer: StateWriter::new(paths.clone(), clock),
            keeper: IndexKeeper::new(index_store),
            archiver: Archiver::new(paths.clone()),
            projection: ProjectionEngine::new(paths.clone(), clock),
            housekeeping: Housekeeping::new(paths, clock),
        }
    }

    /// Writes `state` at `ticktime_ms` (milliseconds since the epoch)
    /// and updates the index and last-good-value hash. Combines C4 and
    /// C5, matching spec.md §4.5's `putDeviceState`.
    pub async fn put_device_state(
        &self,
        devid: u32,
        ticktime_ms: u64,
        state: &DevState,
    ) -> Result<(), StoreError> {
        let block = self.clock.block_index_of_ticktime_ms(ticktime_ms);
        let new_file = self.writer.write(devid, ticktime_ms, state).await?;
        self.keeper
            .put_device_state(devid, block, ticktime_ms / 1000, state, new_file)
            .await
    }

    /// Resolves the freshest observation of each requested metric no
    /// later than `reference_time_ms`. Empty `metric_ids` returns every
    /// metric in the single freshest qualifying record (spec.md §4.8).
    pub async fn project_metrics(
        &self,
        devid: u32,
        reference_time_ms: u64,
        metric_ids: &[u32],
    ) -> Result<Vec<ResolvedMetric>, StoreError> {
        self.projection
            .project_metrics(&self.keeper, devid, reference_time_ms, metric_ids)
            .await
    }

    /// The oldest and newest live block indices known for `devid`.
    pub async fn get_device_time_span(&self, devid: u32) -> Result<Option<(i64, i64)>, StoreError> {
        let mut blocks = self.keeper.live_blocks(devid).await?;
        blocks.extend(self.keeper.archived_blocks(devid).await?);
        if blocks.is_empty() {
            return Ok(None);
        }
        let min = *blocks.iter().min().unwrap();
        let max = *blocks.iter().max().unwrap();
        Ok(Some((min, max)))
    }

    pub async fn get_device_last_good_value(&self, devid: u32) -> Result<LastGoodValue, StoreError> {
        self.keeper.last_good_value(devid).await
    }

    /// Prunes future-dated blocks, then archives aged ones if
    /// `level1_blocks > 0` (spec.md §4.9).
    pub async fn housekeeping(&self, level1_blocks: usize) -> Result<(), StoreError> {
        self.housekeeping.run(&self.keeper, level1_blocks).await
    }

    /// Archives a specific device/block pair directly (spec.md §4.6),
    /// bypassing the retention-depth sweep `housekeeping` performs.
    pub async fn archive_device_block(&self, devid: u32, block: i64) -> Result<(), StoreError> {
        self.archiver.archive_device_block(&self.keeper, devid, block).await
    }

    pub async fn devices(&self) -> Result<Vec<u32>, StoreError> {
        self.keeper.devices().await
    }
}
