//! `conductor init` - scaffold project config and database.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::adapters::sqlite::initialize_database;
use crate::infrastructure::DEFAULT_CONFIG_YAML;

pub async fn handle_init(force: bool, json: bool) -> Result<()> {
    let dir = Path::new(".conductor");
    let config_path = dir.join("config.yaml");

    if config_path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", config_path.display());
    }

    std::fs::create_dir_all(dir).context("Failed to create .conductor directory")?;
    std::fs::write(&config_path, DEFAULT_CONFIG_YAML).context("Failed to write config")?;

    let pool = initialize_database("sqlite:.conductor/conductor.db")
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    if json {
        println!("{}", serde_json::json!({ "config": config_path.display().to_string(), "database": ".conductor/conductor.db" }));
    } else {
        println!("Initialized {} and .conductor/conductor.db", config_path.display());
    }
    Ok(())
}
