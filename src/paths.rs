// SPDX-License-Identifier: Apache-2.0, MIT

//! C2 — Path Resolver: maps (device, block, instant) to file-system paths
//! for live and archived data (spec.md §4.2). Directories are created
//! lazily by callers (see [`crate::writer`], [`crate::archiver`]); this
//! module only computes paths.

use std::path::{Path, PathBuf};

use crate::clock::BlockIndex;

#[derive(Debug, Clone)]
pub struct PathResolver {
    data_root: PathBuf,
}

impl PathResolver {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// `dataRoot/<block>/`
    pub fn live_block_dir(&self, block: BlockIndex) -> PathBuf {
        self.data_root.join(block.to_string())
    }

    /// `dataRoot/<block>/<devid>/`
    pub fn live_device_block_dir(&self, block: BlockIndex, devid: u32) -> PathBuf {
        self.live_block_dir(block).join(devid.to_string())
    }

    /// `<devBlockDir>/<floor(ticktime_ms/1000)>.dat`
    pub fn record_path(&self, block: BlockIndex, devid: u32, ticktime_ms: u64) -> PathBuf {
        let epoch_secs = ticktime_ms / 1000;
        self.live_device_block_dir(block, devid)
            .join(format!("{epoch_secs}.dat"))
    }

    /// The staging file a write lands in before the atomic rename.
    pub fn record_tmp_path(&self, block: BlockIndex, devid: u32, ticktime_ms: u64) -> PathBuf {
        let mut p = self.record_path(block, devid, ticktime_ms);
        p.set_extension("dat.tmp");
        p
    }

    /// `dataRoot/archive/<devid>/`
    pub fn archive_device_dir(&self, devid: u32) -> PathBuf {
        self.data_root.join("archive").join(devid.to_string())
    }

    /// `dataRoot/archive/<devid>/<devid>-<block>.tgz`
    pub fn archive_path(&self, devid: u32, block: BlockIndex) -> PathBuf {
        self.archive_device_dir(devid)
            .join(format!("{devid}-{block}.tgz"))
    }

    /// The epoch-seconds filename stem of a record path, if it parses.
    pub fn epoch_of_record_file(path: &Path) -> Option<u64> {
        path.file_stem()?.to_str()?.parse().ok()
    }
}
