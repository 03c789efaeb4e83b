// SPDX-License-Identifier: Apache-2.0, MIT

//! C7 — Block Loader: materializes a block's record files on disk,
//! transparently extracting from the archive first if necessary
//! (spec.md §4.7).

use std::path::PathBuf;

use crate::archiver::Archiver;
use crate::clock::BlockIndex;
use crate::error::StoreError;
use crate::index::IndexKeeper;
use crate::index_store::IndexStore;
use crate::paths::PathResolver;

#[derive(Debug, Clone)]
pub struct BlockLoader {
    paths: PathResolver,
    archiver: Archiver,
}

impl BlockLoader {
    pub fn new(paths: PathResolver) -> Self {
        Self {
            archiver: Archiver::new(paths.clone()),
            paths,
        }
    }

    /// Opens `devid`'s `block`, extracting the archive back into
    /// `dataRoot` first if the block is currently archived. Returns the
    /// live device-block directory and the `.dat` files found in it
    /// (unsorted; callers sort as their algorithm requires).
    pub async fn open_block<S: IndexStore>(
        &self,
        keeper: &IndexKeeper<S>,
        devid: u32,
        block: BlockIndex,
    ) -> Result<(PathBuf, Vec<PathBuf>), StoreError> {
        if keeper.is_block_archived(devid, block).await? {
            self.archiver.extract_device_block(devid, block).await?;
        }

        let dir = self.paths.live_device_block_dir(block, devid);
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((dir, files));
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("dat") {
                files.push(path);
            }
        }
        Ok((dir, files))
    }
}
