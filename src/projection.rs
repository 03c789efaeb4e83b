// SPDX-License-Identifier: Apache-2.0, MIT

//! C8 — Projection Engine: walks live, then archived, blocks backward
//! from a reference instant to resolve the freshest observation of each
//! requested metric (spec.md §4.8).

use std::collections::HashSet;

use tracing::warn;

use crate::clock::{BlockClock, BlockIndex};
use crate::codec;
use crate::error::StoreError;
use crate::index::IndexKeeper;
use crate::index_store::IndexStore;
use crate::loader::BlockLoader;
use crate::model::ResolvedMetric;
use crate::paths::PathResolver;

/// Blocks walked per live pass, default `48 / blockHours` (spec.md §4.8).
pub const LIVE_TRAVEL_MAX_HOURS: u32 = 48;

/// Blocks walked per archive pass — archives are slow to open, so the
/// budget is small and fixed.
pub const ARCHIVE_TRAVEL_MAX: usize = 2;

pub struct ProjectionEngine {
    clock: BlockClock,
    loader: BlockLoader,
}

impl ProjectionEngine {
    pub fn new(paths: PathResolver, clock: BlockClock) -> Self {
        Self {
            loader: BlockLoader::new(paths),
            clock,
        }
    }

    fn live_travel_max(&self) -> usize {
        (LIVE_TRAVEL_MAX_HOURS / self.clock.block_hours()).max(1) as usize
    }

    /// Resolves the freshest observation of each requested metric no
    /// later than `reference_time_ms` (milliseconds since the epoch,
    /// the same unit `write`'s `ticktime` takes). An empty `metric_ids`
    /// means "every metric found in the single freshest qualifying
    /// record".
    pub async fn project_metrics<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        devid: u32,
        reference_time_ms: u64,
        metric_ids: &[u32],
    ) -> Result<Vec<ResolvedMetric>, StoreError> {
        let reference_epoch_secs = reference_time_ms / 1000;
        let reference_block = self.clock.block_index_of_ticktime_ms(reference_time_ms);
        let wanted: HashSet<u32> = metric_ids.iter().copied().collect();
        let mut resolved: HashSet<u32> = HashSet::new();
        let mut result = Vec::new();

        let live_blocks = self.descending_blocks_at_most(
            keeper.live_blocks(devid).await?,
            reference_block,
            self.live_travel_max(),
        );
        self.walk_blocks(
            keeper,
            devid,
            &live_blocks,
            reference_epoch_secs,
            &wanted,
            &mut resolved,
            &mut result,
        )
        .await?;

        let single_freshest_only = metric_ids.is_empty() && !result.is_empty();
        let done = single_freshest_only || (!metric_ids.is_empty() && resolved.len() == wanted.len());

        if !done {
            let archived_blocks = self.descending_blocks_at_most(
                keeper.archived_blocks(devid).await?,
                reference_block,
                ARCHIVE_TRAVEL_MAX,
            );
            self.walk_blocks(
                keeper,
                devid,
                &archived_blocks,
                reference_epoch_secs,
                &wanted,
                &mut resolved,
                &mut result,
            )
            .await?;
        }

        Ok(result)
    }

    fn descending_blocks_at_most(
        &self,
        mut blocks: Vec<BlockIndex>,
        reference_block: BlockIndex,
        limit: usize,
    ) -> Vec<BlockIndex> {
        blocks.retain(|&b| b <= reference_block);
        blocks.sort_unstable_by(|a, b| b.cmp(a));
        blocks.truncate(limit);
        blocks
    }

    /// Walks `blocks` in order, decoding each `.dat` file no later than
    /// `reference_epoch_secs` newest-first, stopping early once every
    /// requested metric id has been resolved. When `metric_ids` is
    /// empty, the walk returns as soon as it has resolved any metrics
    /// from the single freshest qualifying record (spec.md §4.8 step 4:
    /// "all metrics it finds in the single freshest record").
    async fn walk_blocks<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        devid: u32,
        blocks: &[BlockIndex],
        reference_epoch_secs: u64,
        wanted: &HashSet<u32>,
        resolved: &mut HashSet<u32>,
        result: &mut Vec<ResolvedMetric>,
    ) -> Result<(), StoreError> {
        for &block in blocks {
            let (_, files) = match self.loader.open_block(keeper, devid, block).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(devid, block, error = %e, "failed to open block during projection, ending walk");
                    break;
                }
            };

            let mut epoch_files: Vec<(u64, std::path::PathBuf)> = files
                .into_iter()
                .filter_map(|p| {
                    PathResolver::epoch_of_record_file(&p).map(|epoch| (epoch, p))
                })
                .filter(|(epoch, _)| *epoch <= reference_epoch_secs)
                .collect();
            epoch_files.sort_by(|a, b| b.0.cmp(&a.0));

            let mut stopped_on_single_freshest = false;
            for (epoch, path) in epoch_files {
                let bytes = match tokio::fs::read(&path).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read record, skipping");
                        continue;
                    }
                };
                let state = match codec::decode_record(&bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to decode record, skipping");
                        continue;
                    }
                };

                let mut any_new = false;
                for metric in &state.metrics {
                    let wants_this =
                        wanted.is_empty() || wanted.contains(&metric.id);
                    if !wants_this || resolved.contains(&metric.id) {
                        continue;
                    }
                    resolved.insert(metric.id);
                    any_new = true;
                    result.push(ResolvedMetric {
                        id: metric.id,
                        status: metric.status,
                        value: metric.value,
                        scale: metric.scale,
                        timestamp: metric.timestamp,
                        ticktime: epoch,
                    });
                }

                if wanted.is_empty() && any_new {
                    stopped_on_single_freshest = true;
                    break;
                }
                if !wanted.is_empty() && resolved.len() == wanted.len() {
                    return Ok(());
                }
            }
            if stopped_on_single_freshest {
                return Ok(());
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

    fn sample(devid: u32, ts: u32, id: u32, value: i32) -> DevState {
        DevState {
            devid,
            timestamp: ts,
            metrics: vec![Metric {
                id,
                status: 0,
                value,
                scale: 0,
                timestamp: None,
            }],
        }
    }

    async fn write_and_index(
        writer: &StateWriter,
        keeper: &IndexKeeper<MemoryIndexStore>,
        clock: &BlockClock,
        devid: u32,
        ticktime_ms: u64,
        state: &DevState,
    ) {
        let block = clock.block_index_of_ticktime_ms(ticktime_ms);
        let new_file = writer.write(devid, ticktime_ms, state).await.unwrap();
        keeper
            .put_device_state(devid, block, ticktime_ms / 1000, state, new_file)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn projects_freshest_value_no_later_than_reference() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        write_and_index(&writer, &keeper, &clock, 7, 1_700_000_000_000, &sample(7, 1_700_000_000, 1, 100)).await;
        write_and_index(&writer, &keeper, &clock, 7, 1_700_000_010_000, &sample(7, 1_700_000_010, 1, 200)).await;

        let engine = ProjectionEngine::new(paths, clock);
        let result = engine
            .project_metrics(&keeper, 7, 1_700_000_005_000, &[1])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].value, 100);
        assert_eq!(result[0].ticktime, 1_700_000_000);
    }

    #[tokio::test]
    async fn empty_metric_list_returns_all_metrics_from_single_freshest_record() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        let state = DevState {
            devid: 8,
            timestamp: 1_700_000_000,
            metrics: vec![
                Metric { id: 1, status: 0, value: 1, scale: 0, timestamp: None },
                Metric { id: 2, status: 0, value: 2, scale: 0, timestamp: None },
            ],
        };
        write_and_index(&writer, &keeper, &clock, 8, 1_700_000_000_000, &state).await;

        let engine = ProjectionEngine::new(paths, clock);
        let result = engine.project_metrics(&keeper, 8, 1_700_000_005_000, &[]).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_archive_when_live_walk_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        write_and_index(&writer, &keeper, &clock, 9, 1_700_000_000_000, &sample(9, 1_700_000_000, 1, 42)).await;
        let block = clock.block_index_of_ticktime_ms(1_700_000_000_000);

        let archiver = crate::archiver::Archiver::new(paths.clone());
        archiver.archive_device_block(&keeper, 9, block).await.unwrap();

        let engine = ProjectionEngine::new(paths, clock);
        let result = engine
            .project_metrics(&keeper, 9, 1_700_000_005_000, &[1])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].value, 42);
    }
}
