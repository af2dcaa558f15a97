use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rentsync::config::Config;
use rentsync::model::Topic;
use rentsync::queue::PendingStore;
use rentsync::services::{PROFILE_TOPIC, VEHICLE_TOPIC};
use rentsync::storage::SqliteStorage;

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only this topic (defaults to all known topics)
    #[arg(long)]
    topic: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.config)?;
    let cfg: Config = serde_yaml::from_str(&raw)?;

    let storage = Arc::new(SqliteStorage::connect(&cfg.database_url()).await?);
    storage.run_migrations().await?;
    let store = PendingStore::new(storage);

    let topics: Vec<Topic> = match args.topic {
        Some(name) => vec![Topic::new(name)],
        None => vec![VEHICLE_TOPIC, PROFILE_TOPIC],
    };

    for topic in &topics {
        let ops = store.list_pending(topic).await?;
        println!("{topic}: {} pending", ops.len());
        for op in ops {
            println!(
                "  {}  {}  {}  {}",
                op.id,
                op.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                op.action,
                op.payload
            );
        }
    }
    Ok(())
}
