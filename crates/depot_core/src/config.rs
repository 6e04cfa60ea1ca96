//! Configuration for the repository store manager.
//!
//! Everything here is resolved once at startup and passed down explicitly.
//! Nothing reads configuration from globals after that point.

use crate::error::{DepotError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Janitor scheduling and eviction policy.
    #[serde(default)]
    pub janitor: JanitorConfig,

    /// Garbage collection and maintenance configuration.
    #[serde(default)]
    pub gc: GcConfig,

    /// Subprocess limits.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Embedded repository database.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| DepotError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| DepotError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DepotError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| DepotError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Apply `DEPOT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `DEPOT_*` overrides using `lookup` as the environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEPOT_REPOS_DIR") {
            self.janitor.repos_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEPOT_SHARD_ID") {
            self.janitor.shard_id = v;
        }
        if let Some(v) = lookup("DEPOT_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        override_parsed(&lookup, "DEPOT_ENABLE_GC_AUTO", &mut self.gc.enable_gc_auto)?;
        override_parsed(&lookup, "DEPOT_ENABLE_MAINTENANCE", &mut self.gc.enable_maintenance)?;
        override_parsed(&lookup, "DEPOT_AUTO_PACK_LIMIT", &mut self.gc.auto_pack_limit)?;
        override_parsed(&lookup, "DEPOT_LOOSE_OBJECTS_LIMIT", &mut self.gc.loose_objects_limit)?;
        override_parsed(&lookup, "DEPOT_MAINTENANCE_RETRIES", &mut self.gc.maintenance_retries)?;
        override_parsed(
            &lookup,
            "DEPOT_MAINTENANCE_LOG_EXPIRY_SECS",
            &mut self.gc.maintenance_log_expiry_secs,
        )?;
        override_parsed(
            &lookup,
            "DEPOT_REMOVE_NON_EXISTING_REPOS",
            &mut self.janitor.remove_non_existing_repos,
        )?;
        override_parsed(
            &lookup,
            "DEPOT_DISABLE_WRONG_SHARD_EVICTION",
            &mut self.janitor.disable_wrong_shard_eviction,
        )?;
        override_parsed(&lookup, "DEPOT_FREE_SPACE_EVICTION", &mut self.janitor.free_space_eviction)?;
        override_parsed(&lookup, "DEPOT_DESIRED_PERCENT_FREE", &mut self.janitor.desired_percent_free)?;
        override_parsed(&lookup, "DEPOT_REPO_TTL_SECS", &mut self.gc.repo_ttl_secs)?;
        Ok(())
    }

    /// Check values that would make the janitor misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.janitor.shard_id.trim().is_empty() {
            return Err(DepotError::ConfigError("janitor.shard_id must not be empty".into()));
        }
        if self.janitor.interval_secs == 0 {
            return Err(DepotError::ConfigError("janitor.interval_secs must be positive".into()));
        }
        if self.janitor.size_recalc_interval_secs == 0 {
            return Err(DepotError::ConfigError(
                "janitor.size_recalc_interval_secs must be positive".into(),
            ));
        }
        if self.janitor.desired_percent_free > 100 {
            return Err(DepotError::ConfigError(
                "janitor.desired_percent_free must be at most 100".into(),
            ));
        }
        if self.gc.auto_pack_limit == 0 {
            return Err(DepotError::ConfigError("gc.auto_pack_limit must be positive".into()));
        }
        if self.gc.loose_objects_limit == 0 {
            return Err(DepotError::ConfigError("gc.loose_objects_limit must be positive".into()));
        }
        if self.gc.gc_failure_reclone_threshold == 0 {
            return Err(DepotError::ConfigError(
                "gc.gc_failure_reclone_threshold must be positive".into(),
            ));
        }
        if self.commands.long_command_timeout_secs == 0 {
            return Err(DepotError::ConfigError(
                "commands.long_command_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The process-wide GC mode derived from the two toggles.
    pub fn gc_mode(&self) -> GcMode {
        GcMode::from_toggles(self.gc.enable_gc_auto, self.gc.enable_maintenance)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| DepotError::ConfigError(format!("invalid {}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}

/// Janitor scheduling and eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JanitorConfig {
    /// Root directory holding all repositories.
    pub repos_dir: PathBuf,

    /// This process's shard address (default: "localhost").
    pub shard_id: String,

    /// Every known shard address, including this one.
    pub shard_addrs: Vec<String>,

    /// Seconds between janitor runs (default: 60).
    pub interval_secs: u64,

    /// Skip the reclone step entirely (default: false).
    pub disable_auto_updates: bool,

    /// Delete repositories missing from the database (default: false).
    pub remove_non_existing_repos: bool,

    /// Never delete repositories owned by another shard (default: false).
    pub disable_wrong_shard_eviction: bool,

    /// Maximum wrong-shard deletions per run. Unlimited when absent.
    pub wrong_shard_delete_limit: Option<u32>,

    /// Minimum seconds between size recalculations per repository (default: 24h).
    pub size_recalc_interval_secs: u64,

    /// Delete the least recently changed repositories while the disk is
    /// fuller than `desired_percent_free` allows (default: false).
    pub free_space_eviction: bool,

    /// Percentage of the disk to keep available (default: 10).
    pub desired_percent_free: u8,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from("repos"),
            shard_id: "localhost".to_string(),
            shard_addrs: Vec::new(),
            interval_secs: 60,
            disable_auto_updates: false,
            remove_non_existing_repos: false,
            disable_wrong_shard_eviction: false,
            wrong_shard_delete_limit: None,
            size_recalc_interval_secs: 24 * 60 * 60, // 24 hours
            free_space_eviction: false,
            desired_percent_free: 10,
        }
    }
}

impl JanitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn size_recalc_interval(&self) -> Duration {
        Duration::from_secs(self.size_recalc_interval_secs)
    }
}

/// Garbage collection and maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GcConfig {
    /// Let the janitor trigger `gc --auto` (default: true).
    pub enable_gc_auto: bool,

    /// Let the janitor run the maintenance script (default: false).
    pub enable_maintenance: bool,

    /// Packfile count above which maintenance is needed (default: 50).
    pub auto_pack_limit: usize,

    /// Estimated loose objects above which maintenance is needed (default: 1024).
    pub loose_objects_limit: usize,

    /// GC failures at which a repository is recloned (default: 5).
    pub gc_failure_reclone_threshold: u32,

    /// Maintenance failures tolerated before reclone (default: 3).
    /// Negative disables the trigger.
    pub maintenance_retries: i32,

    /// Seconds a failed maintenance log blocks new attempts (default: 24h).
    pub maintenance_log_expiry_secs: u64,

    /// Age in seconds after which a repository is recloned (default: 45 days).
    /// 0 disables age-based reclones.
    pub repo_ttl_secs: u64,

    /// Age in seconds after which a repository with a non-empty `gc.log` is
    /// recloned (default: 2 days). 0 disables the trigger.
    pub repo_ttl_gc_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enable_gc_auto: true,
            enable_maintenance: false,
            auto_pack_limit: 50,
            loose_objects_limit: 1024,
            gc_failure_reclone_threshold: 5,
            maintenance_retries: 3,
            maintenance_log_expiry_secs: 24 * 60 * 60, // 24 hours
            repo_ttl_secs: 45 * 24 * 60 * 60, // 45 days
            repo_ttl_gc_secs: 2 * 24 * 60 * 60, // 2 days
        }
    }
}

impl GcConfig {
    pub fn maintenance_log_expiry(&self) -> Duration {
        Duration::from_secs(self.maintenance_log_expiry_secs)
    }

    pub fn repo_ttl(&self) -> Option<Duration> {
        (self.repo_ttl_secs > 0).then(|| Duration::from_secs(self.repo_ttl_secs))
    }

    pub fn repo_ttl_gc(&self) -> Option<Duration> {
        (self.repo_ttl_gc_secs > 0).then(|| Duration::from_secs(self.repo_ttl_gc_secs))
    }
}

/// Subprocess limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsConfig {
    /// Upper bound for fetch, gc and maintenance commands (default: 1 hour).
    pub long_command_timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            long_command_timeout_secs: 60 * 60,
        }
    }
}

impl CommandsConfig {
    pub fn long_command_timeout(&self) -> Duration {
        Duration::from_secs(self.long_command_timeout_secs)
    }
}

/// Embedded repository database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the redb file (default: "depot.redb").
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("depot.redb"),
        }
    }
}

/// How repository packing is kept healthy. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcMode {
    /// The version-control tool runs auto-GC on its own.
    ToolManaged,
    /// The janitor triggers `gc --auto`.
    JanitorGcAuto,
    /// The janitor runs the maintenance script and disables tool auto-GC.
    JanitorMaintenance,
}

impl GcMode {
    /// Resolve the mode from the two toggles. Enabling both is rejected in
    /// favour of the tool-managed default.
    pub fn from_toggles(enable_gc_auto: bool, enable_maintenance: bool) -> Self {
        match (enable_gc_auto, enable_maintenance) {
            (true, false) => GcMode::JanitorGcAuto,
            (false, true) => GcMode::JanitorMaintenance,
            _ => GcMode::ToolManaged,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GcMode::ToolManaged => "tool_managed",
            GcMode::JanitorGcAuto => "janitor_gc_auto",
            GcMode::JanitorMaintenance => "janitor_maintenance",
        }
    }
}

impl std::fmt::Display for GcMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
