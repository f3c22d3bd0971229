use anyhow::Result;
use clap::Parser;
use sgtfs_meta::{KvStore, MemoryKvStore};
use sgtfs_recipe::SourceRegistry;
use sgtfs_transport::HttpClientFactory;
use sgtfs_volume::cli::{Cli, Command};
use sgtfs_volume::{VolumeConfig, VolumeNode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Serve { config } => serve(config).await,
        _ => cli.run().await,
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = if config_path.exists() {
        VolumeConfig::from_file(config_path)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", config_path.display());
        VolumeConfig::default()
    };

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let factory = Arc::new(HttpClientFactory::new(Duration::from_millis(
        config.transport.probe_timeout_ms,
    ))?);
    let bind_addr = config.bind_addr;
    let node = VolumeNode::build(config, kv, SourceRegistry::with_local_fs(), factory)?;

    let report = node.scan();
    tracing::info!(
        files = report.files,
        directories = report.directories,
        errors = report.errors,
        "exports scanned"
    );

    let listener = TcpListener::bind(bind_addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = node.start(listener, shutdown_rx)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    running.join().await
}
