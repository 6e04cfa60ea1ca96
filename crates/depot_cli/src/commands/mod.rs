//! CLI commands.

pub mod config;
pub mod janitor;
pub mod repo;
pub mod update;

use anyhow::{Context, Result};
use depot_core::{Config, GitCli, RedbDatabase};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loads the config file, applies `DEPOT_*` overrides and validates.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Opens (or creates) the embedded repository database.
pub fn open_database(config: &Config) -> Result<Arc<RedbDatabase>> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = RedbDatabase::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(db))
}

pub fn git_backend(config: &Config) -> Arc<GitCli> {
    Arc::new(GitCli::new(config.commands.long_command_timeout()))
}

/// Token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
