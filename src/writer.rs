// SPDX-License-Identifier: Apache-2.0, MIT

//! C4 — State Writer: lays a [`DevState`] down on disk as an
//! atomically-renamed record file (spec.md §4.4).
//!
//! Grounded in the teacher's write path for `SledDb`/`RocksDb`
//! (`write`/`bulk_write` in `node/db/lib.rs`): both write through a
//! staging step that can't leave a torn file visible at the final path.
//! Here the staging step is a literal temp file plus `rename`, since the
//! store's unit of storage is a filesystem record rather than an engine
//! transaction.

use tokio::fs;

use crate::clock::BlockClock;
use crate::codec;
use crate::error::StoreError;
use crate::model::DevState;
use crate::paths::PathResolver;

/// Writes device-state records to their block-bucketed location on disk.
#[derive(Debug, Clone)]
pub struct StateWriter {
    paths: PathResolver,
    clock: BlockClock,
}

impl StateWriter {
    pub fn new(paths: PathResolver, clock: BlockClock) -> Self {
        Self { paths, clock }
    }

    /// Encodes and writes `state` at `ticktime_ms`, returning whether the
    /// record file did not already exist (spec.md §4.4's `newFile`).
    ///
    /// 1. Encode and checksum per C3.
    /// 2. Derive `path` and `tmp` via C2.
    /// 3. Probe whether `path` exists.
    /// 4. Ensure the parent directory exists.
    /// 5. Write the full buffer to `tmp`.
    /// 6. Rename `tmp` to `path` (atomic within the same directory).
    /// 7. Return whether the record was new.
    pub async fn write(&self, devid: u32, ticktime_ms: u64, state: &DevState) -> Result<bool, StoreError> {
        let block = self.clock.block_index_of_ticktime_ms(ticktime_ms);
        let record = codec::encode_record(state);

        let path = self.paths.record_path(block, devid, ticktime_ms);
        let tmp = self.paths.record_tmp_path(block, devid, ticktime_ms);

        let new_file = fs::metadata(&path).await.is_err();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&tmp, &record).await?;
        fs::rename(&tmp, &path).await?;

        Ok(new_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;

    fn sample(devid: u32) -> DevState {
        DevState {
            devid,
            timestamp: 1_700_000_000,
            metrics: vec![Metric {
                id: 1,
                status: 0,
                value: 42,
                scale: 0,
                timestamp: None,
            }],
        }
    }

    #[tokio::test]
    async fn write_creates_new_file_then_reports_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StateWriter::new(PathResolver::new(dir.path()), BlockClock::new(2));

        let ticktime_ms = 1_700_000_000_000;
        let first = writer.write(7, ticktime_ms, &sample(7)).await.unwrap();
        assert!(first);

        let second = writer.write(7, ticktime_ms, &sample(7)).await.unwrap();
        assert!(!second);

        let block = BlockClock::new(2).block_index_of_ticktime_ms(ticktime_ms);
        let path = PathResolver::new(dir.path()).record_path(block, 7, ticktime_ms);
        let bytes = fs::read(&path).await.unwrap();
        assert_eq!(codec::decode_record(&bytes).unwrap(), sample(7));
    }

    #[tokio::test]
    async fn write_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StateWriter::new(PathResolver::new(dir.path()), BlockClock::new(2));
        let ticktime_ms = 1_700_000_000_000;
        writer.write(3, ticktime_ms, &sample(3)).await.unwrap();

        let block = BlockClock::new(2).block_index_of_ticktime_ms(ticktime_ms);
        let tmp = PathResolver::new(dir.path()).record_tmp_path(block, 3, ticktime_ms);
        assert!(fs::metadata(&tmp).await.is_err());
    }
}
