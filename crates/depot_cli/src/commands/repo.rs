//! Single-repository inspection and management.

use super::{git_backend, open_database};
use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use console::style;
use depot_core::{
    dir_size, needs_maintenance, reclone_trigger, repo_dir_from_name, sentinel, AddressResolver,
    Backend, CloneStatus, Config, HashResolver, Limits, ReclonePolicy, RepoName, RepoRecord,
};
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn format_time(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_unix(secs: u64) -> String {
    format_time(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Show what the janitor knows about one repository.
pub async fn status(config: &Config, name: &str) -> Result<()> {
    let name = RepoName::new(name);
    let dir = repo_dir_from_name(&config.janitor.repos_dir, &name);

    println!("{}", style(format!("Repository {}", name)).bold());
    println!("  Path:   {}", dir);
    if let Some(owner) = HashResolver.addr_for_repo(&name, &config.janitor.shard_addrs) {
        println!("  Shard:  {}", owner);
    }

    if dir.as_path().exists() {
        let size = dir_size(dir.as_path());
        println!("  Size:   {:.2} MB", size as f64 / 1_048_576.0);

        let limits = Limits {
            auto_pack_limit: config.gc.auto_pack_limit,
            loose_objects_limit: config.gc.loose_objects_limit,
        };
        match needs_maintenance(&dir, limits) {
            Ok(reason) if reason.needed() => {
                println!("  Maintenance:        {} ({})", style("needed").yellow(), reason)
            }
            Ok(_) => println!("  Maintenance:        {}", style("not needed").green()),
            Err(e) => println!("  Maintenance:        {} ({})", style("unknown").red(), e),
        }
        println!("  GC failures:        {}", sentinel::read_gc_failures(&dir));
        println!(
            "  Maintenance fails:  {}{}",
            sentinel::read_maintenance_failures(&dir),
            if sentinel::maintenance_log_fresh(&dir, config.gc.maintenance_log_expiry()) {
                " (backing off)"
            } else {
                ""
            }
        );
        println!(
            "  Corruption flag:    {}",
            if sentinel::corruption_flag_raised(&dir) {
                style("raised").red()
            } else {
                style("clear").green()
            }
        );
        if let Some(t) = sentinel::last_changed(&dir) {
            println!("  Last changed:       {}", format_time(t));
        }
        if let Ok(hash) = fs::read(dir.path(&[sentinel::REF_HASH_FILE])) {
            println!("  Ref hash:           {}", hex::encode(hash));
        }

        let backend = git_backend(config);
        let repo_type = backend.repository_type(&dir).await.unwrap_or(None);
        let cloned_at = sentinel::read_reclone_time(&dir);
        if let Some(t) = cloned_at {
            println!("  Cloned:             {}", format_time(t));
        }
        let policy = ReclonePolicy::from_config(&config.gc);
        let cloned_at = cloned_at.unwrap_or_else(SystemTime::now);
        if let Some(trigger) = reclone_trigger(policy, &dir, repo_type.as_deref(), cloned_at) {
            println!("  {} Next janitor run will reclone: {}", style("⚠").yellow(), trigger);
        }
    } else {
        println!("  {} Not cloned on this shard", style("×").red());
    }

    let db = open_database(config)?;
    match db.get(name.as_str())? {
        Some(record) => {
            println!();
            println!("{}", style("Database record:").bold());
            println!("  Clone status: {}", record.clone_status.as_str());
            if !record.shard_id.is_empty() {
                println!("  Shard:        {}", record.shard_id);
            }
            if let Some(size) = record.size_bytes {
                println!("  Size:         {:.2} MB", size as f64 / 1_048_576.0);
            }
            if let Some(err) = &record.last_error {
                println!("  Last error:   {}", style(err).red());
            }
            for log in record.corruption_logs.iter().take(3) {
                println!("  {} {} {}", style("corrupt").red(), format_unix(log.timestamp), log.reason);
            }
        }
        None => println!("  {} Not registered in the database", style("ℹ").blue()),
    }
    Ok(())
}

/// Raise the corruption flag so the next janitor run removes the repository.
pub fn mark_corrupt(config: &Config, name: &str, reason: &str) -> Result<()> {
    let name = RepoName::new(name);
    let dir = repo_dir_from_name(&config.janitor.repos_dir, &name);
    if !dir.as_path().exists() {
        bail!("repository {} is not cloned under {}", name, config.janitor.repos_dir.display());
    }
    sentinel::raise_corruption_flag(&dir, reason)?;
    println!(
        "{} Flagged {}. The next janitor run will remove it.",
        style("✓").green(),
        name
    );
    Ok(())
}

/// Add a repository to the database so that it survives non-existing eviction.
pub fn register(config: &Config, name: &str) -> Result<()> {
    let name = RepoName::new(name);
    let dir = repo_dir_from_name(&config.janitor.repos_dir, &name);
    let db = open_database(config)?;

    let mut record = db.get(name.as_str())?.unwrap_or_else(|| RepoRecord::new(&name));
    record.shard_id = config.janitor.shard_id.clone();
    record.clone_status = if dir.as_path().exists() {
        CloneStatus::Cloned
    } else {
        CloneStatus::NotCloned
    };
    db.insert(&record)?;

    println!(
        "{} Registered {} ({})",
        style("✓").green(),
        name,
        record.clone_status.as_str()
    );
    Ok(())
}
