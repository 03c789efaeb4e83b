// SPDX-License-Identifier: Apache-2.0, MIT

//! Store configuration, read from the environment the way the teacher's
//! `RocksDbConfig`/`ParityDbConfig` (`node/db/src/rocks_config.rs`,
//! `parity_db_config.rs`) are built: a `serde`-derived struct with a
//! hardcoded `Default`, here adapted to read `std::env::var` at
//! construction rather than from a TOML file, since this store has no
//! config-file surface of its own (spec.md is silent on one).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_HOURS_PER_BLOCK: u32 = 2;
const DEFAULT_DATA_ROOT: &str = "./fm-data";
const DEFAULT_LEVEL1_BLOCKS: usize = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `FM_HOURS_PER_BLOCK`: block width in hours, `[1, 24]`.
    pub hours_per_block: u32,
    /// `FM_DATA_ROOT`: root directory for live and archived data.
    pub data_root: PathBuf,
    /// `FM_LEVEL1_BLOCKS`: default retention depth passed to housekeeping.
    pub level1_blocks: usize,
    /// `FM_LOG_CONSOLE`: whether to additionally log to stderr.
    pub log_console: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hours_per_block: DEFAULT_HOURS_PER_BLOCK,
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            level1_blocks: DEFAULT_LEVEL1_BLOCKS,
            log_console: false,
        }
    }
}

impl StoreConfig {
    /// Builds a config from the environment, falling back to defaults
    /// (with a warning) for missing or malformed values. A malformed
    /// environment must not crash a long-running daemon.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let hours_per_block = std::env::var("FM_HOURS_PER_BLOCK")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&v| (1..=24).contains(&v))
            .unwrap_or_else(|| {
                if std::env::var("FM_HOURS_PER_BLOCK").is_ok() {
                    warn!("FM_HOURS_PER_BLOCK out of range [1, 24] or unparseable, using default");
                }
                defaults.hours_per_block
            });

        let data_root = std::env::var("FM_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_root);

        let level1_blocks = std::env::var("FM_LEVEL1_BLOCKS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.level1_blocks);

        let log_console = std::env::var("FM_LOG_CONSOLE")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false);

        Self {
            hours_per_block,
            data_root,
            level1_blocks,
            log_console,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.hours_per_block, 2);
        assert_eq!(cfg.level1_blocks, 0);
    }
}
