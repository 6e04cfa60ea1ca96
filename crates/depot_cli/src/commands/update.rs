//! Repository update command.

use super::{cancel_on_ctrl_c, git_backend, open_database};
use anyhow::{Context, Result};
use console::style;
use depot_core::{repo_dir_from_name, sentinel, Config, RepoName, RepoStore, RepoUpdater, RepositoryLocker};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::time::Duration;

/// Fetch one repository.
pub async fn run(config: &Config, name: &str, rev: Option<&str>) -> Result<()> {
    let name = RepoName::new(name);
    let updater = RepoUpdater::new(
        RepoStore::new(&config.janitor.repos_dir),
        git_backend(config),
        open_database(config)?,
        RepositoryLocker::new(),
        config.janitor.shard_id.clone(),
        config.commands.long_command_timeout(),
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(format!("Fetching {}...", name));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = updater.update(&name, rev, &cancel_on_ctrl_c()).await;
    pb.finish_and_clear();
    result.with_context(|| format!("Failed to update {}", name))?;

    println!("{} Updated {}", style("✓").green(), name);
    let dir = repo_dir_from_name(&config.janitor.repos_dir, &name);
    if let Ok(hash) = fs::read(dir.path(&[sentinel::REF_HASH_FILE])) {
        println!("  Ref hash: {}", hex::encode(hash));
    }
    Ok(())
}
