// SPDX-License-Identifier: Apache-2.0, MIT

//! C9 — Housekeeping: prunes future-dated live blocks and archives aged
//! ones (spec.md §4.9).
//!
//! Two of spec.md's REDESIGN FLAGS live here: the source's archival
//! guard was `!level1Blocks > 0` (always false due to operator
//! precedence — treated here as the intended `level1Blocks > 0`), and
//! its `removeBlocksAfter` closure dropped errors from the delete step
//! (propagated here with `?`, matching `forest_db::rolling::gc`'s
//! pattern of bubbling every I/O error out of its sweep loop instead of
//! swallowing it).

use tracing::{info, warn};

use crate::archiver::Archiver;
use crate::clock::BlockClock;
use crate::error::StoreError;
use crate::index::IndexKeeper;
use crate::index_store::IndexStore;
use crate::paths::PathResolver;

pub struct Housekeeping {
    paths: PathResolver,
    clock: BlockClock,
    archiver: Archiver,
}

impl Housekeeping {
    pub fn new(paths: PathResolver, clock: BlockClock) -> Self {
        Self {
            archiver: Archiver::new(paths.clone()),
            paths,
            clock,
        }
    }

    /// Runs a full housekeeping pass: prune future-dated blocks, then
    /// (if `level1_blocks > 0`) archive the oldest blocks beyond that
    /// retention depth for every device.
    pub async fn run<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        level1_blocks: usize,
    ) -> Result<(), StoreError> {
        self.prune_future(keeper).await?;
        if level1_blocks > 0 {
            self.archive_aged(keeper, level1_blocks).await?;
        }
        Ok(())
    }

    /// For every known device, removes live blocks dated after the
    /// current block and deletes their directories.
    async fn prune_future<S: IndexStore>(&self, keeper: &IndexKeeper<S>) -> Result<(), StoreError> {
        let now_block = self.clock.block_index(chrono::Utc::now());
        for devid in keeper.devices().await? {
            let future_blocks = keeper.live_blocks_after(devid, now_block).await?;
            for block in future_blocks {
                info!(devid, block, now_block, "pruning future-dated block");
                keeper.remove_device_block_index(devid, block).await?;
                let dir = self.paths.live_device_block_dir(block, devid);
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// For every known device whose live-block count exceeds
    /// `level1_blocks`, archives the oldest excess blocks.
    async fn archive_aged<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        level1_blocks: usize,
    ) -> Result<(), StoreError> {
        for devid in keeper.devices().await? {
            let live = keeper.live_blocks(devid).await?;
            if live.len() <= level1_blocks {
                continue;
            }
            let excess = live.len() - level1_blocks;
            let oldest = keeper.oldest_live_blocks(devid, excess).await?;
            for block in oldest {
                info!(devid, block, "archiving aged block");
                if let Err(e) = self.archiver.archive_device_block(keeper, devid, block).await {
                    warn!(devid, block, error = %e, "failed to archive block, will retry next pass");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_store::MemoryIndexStore;
    use crate::model::{DevState, Metric};
    use crate::writer::StateWriter;
    use chrono::{TimeZone, Utc};

    fn sample(devid: u32) -> DevState {
        DevState {
            devid,
            timestamp: 1_700_000_000,
            metrics: vec![Metric {
                id: 1,
                status: 0,
                value: 1,
                scale: 0,
                timestamp: None,
            }],
        }
    }

    #[tokio::test]
    async fn prunes_only_future_dated_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        let past_ms = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap().timestamp_millis() as u64;
        let future_ms = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap().timestamp_millis() as u64;

        for ms in [past_ms, future_ms] {
            let block = clock.block_index_of_ticktime_ms(ms);
            writer.write(9, ms, &sample(9)).await.unwrap();
            keeper
                .put_device_state(9, block, ms / 1000, &sample(9), true)
                .await
                .unwrap();
        }

        let housekeeping = Housekeeping::new(paths, clock);
        housekeeping.run(&keeper, 0).await.unwrap();

        let remaining = keeper.live_blocks(9).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0], clock.block_index_of_ticktime_ms(past_ms));
    }

    #[tokio::test]
    async fn archives_oldest_blocks_beyond_retention_depth() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        let base_ms = Utc.with_ymd_and_hms(2023, 11, 14, 0, 0, 0).unwrap().timestamp_millis() as u64;
        for day in 0..6u64 {
            let ms = base_ms + day * 24 * 3600 * 1000;
            let block = clock.block_index_of_ticktime_ms(ms);
            writer.write(4, ms, &sample(4)).await.unwrap();
            keeper
                .put_device_state(4, block, ms / 1000, &sample(4), true)
                .await
                .unwrap();
        }

        let housekeeping = Housekeeping::new(paths, clock);
        housekeeping.run(&keeper, 2).await.unwrap();

        assert_eq!(keeper.live_blocks(4).await.unwrap().len(), 2);
        assert_eq!(keeper.archived_blocks(4).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn zero_level1_blocks_skips_archival_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        let ms = Utc.with_ymd_and_hms(2023, 11, 14, 0, 0, 0).unwrap().timestamp_millis() as u64;
        let block = clock.block_index_of_ticktime_ms(ms);
        writer.write(2, ms, &sample(2)).await.unwrap();
        keeper.put_device_state(2, block, ms / 1000, &sample(2), true).await.unwrap();

        let housekeeping = Housekeeping::new(paths, clock);
        housekeeping.run(&keeper, 0).await.unwrap();

        assert_eq!(keeper.live_blocks(2).await.unwrap().len(), 1);
        assert!(keeper.archived_blocks(2).await.unwrap().is_empty());
    }
}
