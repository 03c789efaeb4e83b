// SPDX-License-Identifier: Apache-2.0, MIT

//! Tracing subscriber setup, in the shape of the forest workspace's own
//! binaries (see `examples/index-car-file.rs`'s `EnvFilter` +
//! `tracing_subscriber::fmt` initialization): an `EnvFilter` driven by
//! `RUST_LOG`, with an additional stderr layer toggled by
//! `FM_LOG_CONSOLE` (spec.md §6).

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::StoreConfig;

/// Installs a global tracing subscriber. Safe to call once per process;
/// subsequent calls are no-ops if a subscriber is already set.
pub fn init_tracing(config: &StoreConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.log_console {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    if result.is_err() {
        tracing::trace!("tracing subscriber already initialized");
    }
}
