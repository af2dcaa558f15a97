use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use rentsync::api::{HttpRentalApi, RentalApi};
use rentsync::cache::ResponseCache;
use rentsync::config;
use rentsync::probe::ManualProbe;
use rentsync::queue::PendingStore;
use rentsync::services::{ProfileService, VehicleService, PROFILE_TOPIC, VEHICLE_TOPIC};
use rentsync::storage::SqliteStorage;
use rentsync::sync::{HandlerRegistry, Synchronizer};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay all pending offline operations against the backend and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let storage = Arc::new(SqliteStorage::connect(&cfg.database_url()).await?);
    storage.run_migrations().await?;

    let store = PendingStore::new(storage.clone());
    let cache = ResponseCache::new(storage);
    let api: Arc<dyn RentalApi> =
        Arc::new(HttpRentalApi::new(&cfg.api.base_url, cfg.api_timeout())?);

    // This tool exists to force a drain, so connectivity is asserted.
    let probe = Arc::new(ManualProbe::new(true));

    let vehicles = Arc::new(VehicleService::new(
        api.clone(),
        store.clone(),
        cache.clone(),
        probe.clone(),
        cfg.vehicles_ttl(),
    ));
    let profile = Arc::new(ProfileService::new(
        api,
        store.clone(),
        cache,
        probe,
        cfg.profile_ttl(),
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(VEHICLE_TOPIC, vehicles);
    registry.register(PROFILE_TOPIC, profile);
    let synchronizer = Synchronizer::new(store, registry);

    let pending = synchronizer.pending_total().await?;
    if pending == 0 {
        info!("no pending operations, exiting");
        return Ok(());
    }
    info!(pending, "starting replay");

    match synchronizer
        .run_with(|progress| info!(progress, "sync progress"))
        .await
    {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.has_failures() {
                warn!(
                    failed = result.failed,
                    "some operations were not replayed; they stay queued"
                );
            }
        }
        None => println!("another sync run is active"),
    }
    Ok(())
}
