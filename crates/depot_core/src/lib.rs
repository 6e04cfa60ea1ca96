//! Depot Core Library
//!
//! Housekeeping for a store of bare git repositories:
//! - A periodic janitor that evicts, repairs, compacts and measures repositories
//! - Per-repository state kept in small sentinel files
//! - Non-blocking repository locks and coalesced background updates
//!
//! # Quick Start
//!
//! ```
//! use depot_core::{RepoName, RepositoryLocker};
//!
//! let locker = RepositoryLocker::new();
//! let repo = RepoName::new("github.com/depot/depot");
//!
//! let lock = locker.try_acquire(&repo, "fetching").unwrap();
//! assert!(locker.try_acquire(&repo, "cloning").is_none());
//!
//! lock.release();
//! assert!(locker.try_acquire(&repo, "cloning").is_some());
//! ```
//!
//! # Features
//!
//! ## Sentinel files
//!
//! Counters survive restarts and a missing file reads as zero:
//!
//! ```
//! use depot_core::{sentinel, GitDir};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let dir = GitDir::new(tmp.path());
//!
//! assert_eq!(sentinel::read_gc_failures(&dir), 0);
//! sentinel::increment_gc_failures(&dir).unwrap();
//! assert_eq!(sentinel::read_gc_failures(&dir), 1);
//! sentinel::reset_gc_failures(&dir).unwrap();
//! assert_eq!(sentinel::read_gc_failures(&dir), 0);
//! ```
//!
//! ## GC mode
//!
//! Chosen once from two toggles. Enabling both falls back to letting git
//! manage itself:
//!
//! ```
//! use depot_core::GcMode;
//!
//! assert_eq!(GcMode::from_toggles(false, true), GcMode::JanitorMaintenance);
//! assert_eq!(GcMode::from_toggles(true, true), GcMode::ToolManaged);
//! ```

mod backend;
mod config;
mod coordinator;
mod corruption;
mod db;
mod error;
mod heuristics;
mod janitor;
mod locker;
mod repo_dir;
pub mod sentinel;
mod shard;
mod store;
mod update;

pub use backend::{Backend, GitCli, REPO_TYPE_CONFIG_KEY};
pub use config::{CommandsConfig, Config, DatabaseConfig, GcConfig, GcMode, JanitorConfig};
pub use coordinator::UpdateCoordinator;
pub use corruption::{
    check_corrupt, jitter_duration, output_indicates_corruption, reclone_trigger, CorruptionReason,
    ReclonePolicy, RecloneTrigger, EXPENSIVE_IMPORT_TYPES,
};
pub use db::{
    CloneStatus, CorruptionLog, RedbDatabase, RepoDatabase, RepoRecord, MAX_CORRUPTION_LOGS,
};
pub use error::{DepotError, ErrorList, Result};
pub use heuristics::{
    has_bitmap, has_commit_graph, needs_maintenance, too_many_loose_objects, too_many_packfiles,
    Limits, MaintenanceReason,
};
pub use janitor::{Janitor, JanitorProgress, JanitorReport, JanitorStep};
pub use locker::{RepositoryLock, RepositoryLocker};
pub use repo_dir::{
    is_ignored_path, repo_dir_from_name, repo_name_from_dir, GitDir, RepoName, TMP_DIR_NAME,
};
pub use sentinel::GcLock;
pub use shard::{hostname_matches, AddressResolver, HashResolver};
pub use store::{
    best_effort_walk, bytes_to_free, dir_size, remove_file_older_than, remove_tmp_packs, DiskSizer,
    RepoStore, StatDiskSizer,
};
pub use update::RepoUpdater;
