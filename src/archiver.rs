// SPDX-License-Identifier: Apache-2.0, MIT

//! C6 — Archiver: packages an aged live block into a compressed tarball
//! and updates the index to match (spec.md §4.6).
//!
//! `tar`/`flate2` are the teacher's own archive dependencies (declared in
//! the workspace root `Cargo.toml` for CAR-file export); here they stand
//! in for the source program's shelled-out `tar` subprocess, the same
//! substitution the teacher makes throughout `node/db` — prefer a
//! library over re-invoking a system binary. Because `tar::Builder` and
//! `flate2`'s encoders are synchronous, the blocking work runs inside
//! `tokio::task::spawn_blocking`, mirroring how the teacher's `rolling`
//! GC (`node/db/src/rolling/gc.rs`) keeps its own blocking compaction
//! work off the async executor's worker threads.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::clock::BlockIndex;
use crate::error::{ArchiveError, StoreError};
use crate::index::IndexKeeper;
use crate::index_store::IndexStore;
use crate::paths::PathResolver;

#[derive(Debug, Clone)]
pub struct Archiver {
    paths: PathResolver,
}

impl Archiver {
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    /// Archives `block` for `devid`:
    /// 1. ensure the device's archive directory exists;
    /// 2. tar+gzip `dataRoot/<block>/<devid>` to the archive path;
    /// 3. remove the live block-index entry and delete the live directory;
    /// 4. add the block-index entry to the archived set.
    ///
    /// If step 2 fails, steps 3–4 do not run — the caller sees the error
    /// and the live data is untouched. If step 3 fails after step 2
    /// succeeded, the archive file and the live directory both linger;
    /// retrying this call overwrites the tarball and completes the
    /// remaining steps (spec.md §4.6's documented at-least-once
    /// semantics).
    pub async fn archive_device_block<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        devid: u32,
        block: BlockIndex,
    ) -> Result<(), StoreError> {
        let archive_dir = self.paths.archive_device_dir(devid);
        let archive_path = self.paths.archive_path(devid, block);
        let live_dir = self.paths.live_device_block_dir(block, devid);

        tokio::fs::create_dir_all(&archive_dir).await?;

        let live_dir_blocking = live_dir.clone();
        let archive_path_blocking = archive_path.clone();
        tokio::task::spawn_blocking(move || create_tarball(&live_dir_blocking, &archive_path_blocking))
            .await
            .map_err(|e| StoreError::Other(format!("archive task panicked: {e}")))??;

        keeper.remove_device_block_index(devid, block).await?;
        tokio::fs::remove_dir_all(&live_dir).await?;
        keeper.mark_device_block_archived(devid, block).await?;

        Ok(())
    }

    /// Extracts `devid`'s archive for `block` back into the live
    /// directory tree, if not already materialized there (spec.md §4.7
    /// step 1).
    pub async fn extract_device_block(&self, devid: u32, block: BlockIndex) -> Result<(), StoreError> {
        let archive_path = self.paths.archive_path(devid, block);
        let data_root = self.paths.data_root().to_path_buf();
        tokio::task::spawn_blocking(move || extract_tarball(&archive_path, &data_root))
            .await
            .map_err(|e| StoreError::Other(format!("extract task panicked: {e}")))??;
        Ok(())
    }
}

fn create_tarball(live_dir: &Path, archive_path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(archive_path).map_err(|e| ArchiveError::Create {
        path: archive_path.display().to_string(),
        source: e,
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    // Preserve the `<block>/<devid>` shape inside the tarball (spec.md
    // §6): `live_dir` is `dataRoot/<block>/<devid>`, so the entry name is
    // its last two path components, not just `<devid>`. Extracting into
    // `dataRoot` must reproduce `dataRoot/<block>/<devid>/`.
    let devid_name = live_dir.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let block_name = live_dir
        .parent()
        .and_then(|p| p.file_name())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let entry_name: PathBuf = block_name.join(devid_name);

    builder
        .append_dir_all(&entry_name, live_dir)
        .map_err(|e| ArchiveError::Create {
            path: archive_path.display().to_string(),
            source: e,
        })?;
    builder
        .into_inner()
        .and_then(|enc| enc.finish())
        .map(drop)
        .map_err(|e| {
            StoreError::from(ArchiveError::Create {
                path: archive_path.display().to_string(),
                source: e,
            })
        })
}

fn extract_tarball(archive_path: &Path, data_root: &Path) -> Result<(), StoreError> {
    let file = fs::File::open(archive_path).map_err(|e| ArchiveError::Extract {
        path: archive_path.display().to_string(),
        source: e,
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(data_root)
        .map_err(|e: io::Error| ArchiveError::Extract {
            path: archive_path.display().to_string(),
            source: e,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::BlockClock;
    use crate::index_store::MemoryIndexStore;
    use crate::model::{DevState, Metric};
    use crate::writer::StateWriter;

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
    async fn archive_then_extract_round_trips_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathResolver::new(dir.path());
        let clock = BlockClock::new(2);
        let writer = StateWriter::new(paths.clone(), clock);
        let keeper = IndexKeeper::new(MemoryIndexStore::new());

        let ticktime_ms = 1_700_000_000_000;
        let block = clock.block_index_of_ticktime_ms(ticktime_ms);
        let new_file = writer.write(4, ticktime_ms, &sample(4)).await.unwrap();
        keeper
            .put_device_state(4, block, ticktime_ms / 1000, &sample(4), new_file)
            .await
            .unwrap();

        let archiver = Archiver::new(paths.clone());
        archiver.archive_device_block(&keeper, 4, block).await.unwrap();

        assert!(keeper.is_block_archived(4, block).await.unwrap());
        assert!(keeper.live_blocks(4).await.unwrap().is_empty());
        assert!(tokio::fs::metadata(paths.live_device_block_dir(block, 4))
            .await
            .is_err());
        assert!(tokio::fs::metadata(paths.archive_path(4, block))
            .await
            .is_ok());

        archiver.extract_device_block(4, block).await.unwrap();
        let restored = paths.live_device_block_dir(block, 4);
        let mut entries = tokio::fs::read_dir(&restored).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
