//! `conductor serve` - run the kernel daemon.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use crate::adapters::sqlite::initialize_database;
use crate::domain::models::KernelConfig;
use crate::services::Kernel;

pub async fn handle_serve(config: KernelConfig) -> Result<()> {
    let database_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&database_url)
        .await
        .context("Failed to initialize database")?;

    let kernel = Kernel::new(pool, config);
    kernel.startup().await.context("Startup reconciliation failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Conductor kernel running");
    kernel.run(shutdown_rx).await.context("Kernel loops failed")?;
    Ok(())
}
