//! `engram init`: create the project-local store and config files.

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use crate::domain::models::Config;

/// Arguments for `engram init`.
#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: InitArgs, json: bool) -> Result<()> {
    let dir = Path::new(".engram");
    if !dir.exists() {
        std::fs::create_dir_all(dir).context("Failed to create .engram directory")?;
    }

    let config_path = dir.join("config.yaml");
    let created_config = if config_path.exists() && !args.force {
        false
    } else {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize default config")?;
        std::fs::write(&config_path, yaml).context("Failed to write config file")?;
        true
    };

    let config = super::load_config()?;
    let repo = super::open_repository(&config).await?;
    crate::adapters::sqlite::verify_connection(repo.pool())
        .await
        .context("Store connectivity check failed")?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "config": config_path.display().to_string(),
                "config_created": created_config,
                "database": config.database.path,
            })
        );
    } else {
        if created_config {
            println!("Wrote {}", config_path.display());
        } else {
            println!("Config already exists at {} (use --force to overwrite)", config_path.display());
        }
        println!("Trace store ready at {}", config.database.path);
    }
    Ok(())
}
