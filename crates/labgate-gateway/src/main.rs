use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use labgate_gateway::{GatewayConfig, Pipeline};
use labgate_network::DeviceListener;
use labgate_storage::{Database, DatabaseConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Laboratory instrument integration gateway.
#[derive(Debug, Parser)]
#[command(name = "labgate", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "labgate.toml")]
    config: PathBuf,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    let db = Database::new(DatabaseConfig::new(&config.database_path))
        .await
        .context("opening database")?;

    let bind_addr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;
    let (listener, inbound) = DeviceListener::bind(bind_addr).await?;
    let registry = listener.registry();

    info!(
        listen_addr = %config.listen_addr,
        database = %config.database_path,
        drivers = ?labgate_protocol::driver_names(),
        "labgate starting"
    );

    let accept_loop = tokio::spawn(listener.run());
    let pipeline = Pipeline::new(db, registry, config.query_host.clone());

    tokio::select! {
        _ = pipeline.run(inbound) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, stopping listener");
        }
    }

    // Stop accepting; readers exit on their next read error and in-flight
    // work is abandoned with the process.
    accept_loop.abort();

    Ok(())
}
