//! Geofence seeder
//!
//! Writes the `[[geofences]]` entries of a config file into the shared
//! store's `geofences` collection, in the shape the region loader reads.
//!
//! Usage:
//!   cargo run --bin geofence-seed -- --config config/dev.toml
//!   cargo run --bin geofence-seed -- --config config/dev.toml --prune

use anyhow::Context;
use clap::Parser;
use geofence_live::infra::config::GeofenceSeed;
use geofence_live::infra::Config;
use geofence_live::io::store::GEOFENCES;
use geofence_live::io::{MqttStore, SharedStore};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Publish geofence definitions to the shared store
#[derive(Parser, Debug)]
#[command(name = "geofence-seed", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Also remove stored geofences that the config no longer lists
    #[arg(long)]
    prune: bool,
}

/// Time given to the event loop to flush queued publishes
const FLUSH_DELAY: Duration = Duration::from_millis(500);

fn seed_value(seed: &GeofenceSeed) -> Value {
    let mut value = json!({
        "Latitude": seed.latitude,
        "Longitude": seed.longitude,
        "Description": seed.description,
    });
    if let Some(radius) = seed.radius_m {
        value["Radius"] = json!(radius);
    }
    if let Some(dwell) = seed.dwell_delay_ms {
        value["DwellDelayMs"] = json!(dwell);
    }
    value
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    anyhow::ensure!(!config.geofence_seeds().is_empty(), "{} lists no [[geofences]]", args.config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = MqttStore::connect(&config, shutdown_rx);

    // Waits for the initial retained sync, so the connection is up afterwards
    let existing = store.read_collection(GEOFENCES).await.context("shared store unreachable")?;

    for seed in config.geofence_seeds() {
        store
            .write(GEOFENCES, &seed.id, seed_value(seed))
            .await
            .with_context(|| format!("failed to write geofence {}", seed.id))?;
        info!(region_id = %seed.id, "geofence_seeded");
    }

    if args.prune {
        for id in existing.keys() {
            if config.geofence_seeds().iter().all(|s| &s.id != id) {
                store.remove(GEOFENCES, id).await?;
                info!(region_id = %id, "geofence_pruned");
            }
        }
    }

    tokio::time::sleep(FLUSH_DELAY).await;
    let _ = shutdown_tx.send(true);
    info!(count = %config.geofence_seeds().len(), "seed_complete");
    Ok(())
}
