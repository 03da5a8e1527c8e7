//! Switchboard service binary.
//!
//! Boots storage, restores every persisted instance, reconnects them and
//! then idles until a shutdown signal. The HTTP surface that fronts the
//! registry lives outside this crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use switchboard::config::Config;
use switchboard::credentials::SqliteCredentialStore;
use switchboard::registry::Registry;
use switchboard::store::MetaStore;
use switchboard::transport::DefaultTransportFactory;
use switchboard::{logging, store};

/// Multi-account messaging switchboard service.
#[derive(Parser)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Path to the TOML config file (defaults to ./switchboard.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local .env is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load_path(cli.config.as_deref()).context("failed to load configuration")?;

    let _log_guard = logging::init_service(
        std::path::Path::new(&config.service.logs_dir),
        &config.service.log_level,
    )
    .context("failed to initialise logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let pool = store::open(&config.storage.db_path)
        .await
        .context("failed to open database")?;
    info!(path = %config.storage.db_path, "database opened");

    let credentials = Arc::new(SqliteCredentialStore::new(pool.clone()));
    let factory = Arc::new(DefaultTransportFactory::new(&config, credentials.clone()));
    let registry = Registry::new(factory, MetaStore::new(pool), credentials, config);

    let restored = registry.load_persisted().await;
    info!(restored, "switchboard ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown signal received");
    registry.shutdown().await;
    info!("bye");
    Ok(())
}
