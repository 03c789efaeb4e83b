// SPDX-License-Identifier: Apache-2.0, MIT

//! Minimal demonstration binary over the device state store's library
//! API (spec.md §1: a full CLI front end is out of scope — this is the
//! demo surface that exercises it, not a product). Device state is read
//! from a JSON file shaped like [`fm_store::DevState`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fm_store::config::StoreConfig;
use fm_store::index_store::SledIndexStore;
use fm_store::store::DeviceStateStore;
use fm_store::{logging, DevState};
use tracing::info;

#[derive(Parser)]
#[command(about = "Device state store demo CLI")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a DevState (read from a JSON file) at a given ticktime.
    Put {
        devid: u32,
        ticktime_ms: u64,
        json_path: PathBuf,
    },
    /// Project the freshest value of the given metric ids as of a reference instant.
    Project {
        devid: u32,
        reference_time_ms: u64,
        #[arg(num_args = 0.., value_delimiter = ',')]
        metric_ids: Vec<u32>,
    },
    /// Print the oldest/newest known block indices for a device.
    TimeSpan { devid: u32 },
    /// Print the last-good-value hash for a device.
    Lgv { devid: u32 },
    /// Run a housekeeping pass: prune future blocks, archive aged ones.
    Housekeeping {
        #[arg(long, default_value_t = 0)]
        level1_blocks: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StoreConfig::from_env();
    logging::init_tracing(&config);

    let args = Args::parse();
    let store: DeviceStateStore<SledIndexStore> = DeviceStateStore::open(&config)?;

    match args.command {
        Command::Put {
            devid,
            ticktime_ms,
            json_path,
        } => {
            let bytes = std::fs::read(&json_path)?;
            let state: DevState = serde_json::from_slice(&bytes)?;
            store.put_device_state(devid, ticktime_ms, &state).await?;
            info!(devid, ticktime_ms, "wrote device state");
        }
        Command::Project {
            devid,
            reference_time_ms,
            metric_ids,
        } => {
            let result = store
                .project_metrics(devid, reference_time_ms, &metric_ids)
                .await?;
            println!("{}", serde_json::to_string_pretty(&debug_metrics(&result))?);
        }
        Command::TimeSpan { devid } => {
            match store.get_device_time_span(devid).await? {
                Some((min, max)) => println!("{devid}: [{min}, {max}]"),
                None => println!("{devid}: no known blocks"),
            }
        }
        Command::Lgv { devid } => {
            let lgv = store.get_device_last_good_value(devid).await?;
            println!("{lgv:#?}");
        }
        Command::Housekeeping { level1_blocks } => {
            store.housekeeping(level1_blocks).await?;
            info!(level1_blocks, "housekeeping pass complete");
        }
    }

    Ok(())
}

/// `ResolvedMetric` doesn't derive `Serialize` (it's an internal
/// projection result, not a wire type); this maps it to plain JSON
/// values for the demo's own output.
fn debug_metrics(metrics: &[fm_store::ResolvedMetric]) -> Vec<serde_json::Value> {
    metrics
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "status": m.status,
                "value": m.value,
                "scale": m.scale,
                "timestamp": m.timestamp,
                "ticktime": m.ticktime,
            })
        })
        .collect()
}
