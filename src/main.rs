use anyhow::Result;
use clap::Parser;
use rentsync::api::{HttpRentalApi, RentalApi};
use rentsync::cache::ResponseCache;
use rentsync::config;
use rentsync::context::{Banner, ConnectivityContext};
use rentsync::probe::HttpProbe;
use rentsync::queue::PendingStore;
use rentsync::services::{ProfileService, VehicleService, PROFILE_TOPIC, VEHICLE_TOPIC};
use rentsync::storage::SqliteStorage;
use rentsync::sync::{HandlerRegistry, Synchronizer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
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

    let probe = Arc::new(HttpProbe::new(
        &cfg.probe.endpoint,
        cfg.probe_interval(),
        cfg.api_timeout(),
    ));
    probe.spawn();

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
        probe.clone(),
        cfg.profile_ttl(),
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(VEHICLE_TOPIC, vehicles);
    registry.register(PROFILE_TOPIC, profile);

    let synchronizer = Synchronizer::new(store, registry);
    let ctx = ConnectivityContext::new(probe, synchronizer, cfg.restored_banner()).await;
    ctx.spawn_watcher();

    info!("offline sync engine running");

    // Log banner transitions for the life of the process.
    let mut state_rx = ctx.subscribe();
    let mut last_banner = state_rx.borrow().banner();
    loop {
        if state_rx.changed().await.is_err() {
            break;
        }
        let banner = state_rx.borrow_and_update().banner();
        if banner != last_banner {
            match &banner {
                Banner::Hidden => info!("banner cleared"),
                other => info!("{other}"),
            }
            last_banner = banner;
        }
    }

    Ok(())
}
