//! Repository database.
//!
//! Every call is assumed to be fallible; callers in the janitor and updater
//! treat failures as best-effort and keep going.

use crate::error::{DepotError, Result};
use crate::repo_dir::RepoName;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Corruption entries kept per repository.
pub const MAX_CORRUPTION_LOGS: usize = 10;

const REPOS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("repos");

/// Whether a repository is present on its shard.
#[repr(u8)]
#[derive(Serialize_repr, Deserialize_repr, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloneStatus {
    #[default]
    NotCloned = 0,
    Cloning = 1,
    Cloned = 2,
}

impl CloneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneStatus::NotCloned => "not_cloned",
            CloneStatus::Cloning => "cloning",
            CloneStatus::Cloned => "cloned",
        }
    }
}

/// One recorded corruption event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CorruptionLog {
    /// Seconds since the unix epoch.
    pub timestamp: u64,
    pub reason: String,
}

/// Stored state for one repository.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoRecord {
    pub name: String,
    pub clone_status: CloneStatus,
    pub shard_id: String,
    pub size_bytes: Option<u64>,
    /// Most recent first.
    pub corruption_logs: Vec<CorruptionLog>,
    pub corrupted_at: Option<u64>,
    pub last_error: Option<String>,
}

impl RepoRecord {
    pub fn new(name: &RepoName) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn push_corruption(&mut self, reason: &str, now: u64) {
        self.corruption_logs.insert(
            0,
            CorruptionLog {
                timestamp: now,
                reason: reason.to_string(),
            },
        );
        self.corruption_logs.truncate(MAX_CORRUPTION_LOGS);
        self.corrupted_at = Some(now);
    }
}

/// Database operations used by the janitor and the updater.
#[async_trait]
pub trait RepoDatabase: Send + Sync {
    /// Records that `repo` was found corrupt on `shard_id`. Unknown
    /// repositories are ignored.
    async fn log_corruption(&self, repo: &RepoName, reason: &str, shard_id: &str) -> Result<()>;

    /// Unknown repositories are ignored.
    async fn set_clone_status(&self, repo: &RepoName, status: CloneStatus, shard_id: &str)
        -> Result<()>;

    /// Stores sizes for all given repositories in one call and returns how
    /// many records were updated.
    async fn update_repo_sizes(&self, shard_id: &str, sizes: &HashMap<RepoName, u64>)
        -> Result<usize>;

    /// `Ok(None)` means the repository is not known. `Err` means the lookup
    /// itself failed.
    async fn get_by_name(&self, repo: &RepoName) -> Result<Option<RepoRecord>>;

    /// Records the last update error, or clears it with `None`.
    async fn set_last_error(&self, repo: &RepoName, error: Option<&str>, shard_id: &str)
        -> Result<()>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn db_err(context: &str, e: impl std::fmt::Display) -> DepotError {
    DepotError::Database(format!("{}: {}", context, e))
}

/// [`RepoDatabase`] stored in an embedded redb file.
pub struct RedbDatabase {
    db: Database,
    path: PathBuf,
}

impl RedbDatabase {
    /// Opens the database at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(|e| db_err("failed to open database", e))?;

        // make sure the table exists so read transactions can open it
        let txn = db.begin_write().map_err(|e| db_err("failed to begin write transaction", e))?;
        txn.open_table(REPOS_TABLE)
            .map_err(|e| db_err("failed to open repos table", e))?;
        txn.commit().map_err(|e| db_err("failed to commit", e))?;

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a repository, replacing any existing record.
    pub fn insert(&self, record: &RepoRecord) -> Result<()> {
        let mut records = HashMap::new();
        records.insert(record.name.clone(), record.clone());
        self.store(&records)
    }

    /// Reads one record.
    pub fn get(&self, name: &str) -> Result<Option<RepoRecord>> {
        let txn = self.db.begin_read().map_err(|e| db_err("failed to begin read transaction", e))?;
        let table = txn
            .open_table(REPOS_TABLE)
            .map_err(|e| db_err("failed to open repos table", e))?;
        let Some(bytes) = table.get(name).map_err(|e| db_err("failed to read record", e))? else {
            return Ok(None);
        };
        let record = postcard::from_bytes(bytes.value()).map_err(|e| db_err("corrupt record", e))?;
        Ok(Some(record))
    }

    /// All records, ordered by name.
    pub fn list(&self) -> Result<Vec<RepoRecord>> {
        let txn = self.db.begin_read().map_err(|e| db_err("failed to begin read transaction", e))?;
        let table = txn
            .open_table(REPOS_TABLE)
            .map_err(|e| db_err("failed to open repos table", e))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| db_err("failed to iterate records", e))? {
            let (_, value) = entry.map_err(|e| db_err("failed to read record", e))?;
            out.push(postcard::from_bytes(value.value()).map_err(|e| db_err("corrupt record", e))?);
        }
        Ok(out)
    }

    fn store(&self, records: &HashMap<String, RepoRecord>) -> Result<()> {
        let txn = self.db.begin_write().map_err(|e| db_err("failed to begin write transaction", e))?;
        {
            let mut table = txn
                .open_table(REPOS_TABLE)
                .map_err(|e| db_err("failed to open repos table", e))?;
            for (name, record) in records {
                let bytes = postcard::to_allocvec(record).map_err(|e| db_err("failed to encode record", e))?;
                table
                    .insert(name.as_str(), bytes.as_slice())
                    .map_err(|e| db_err("failed to write record", e))?;
            }
        }
        txn.commit().map_err(|e| db_err("failed to commit", e))?;
        Ok(())
    }

    /// Reads, modifies and writes back one record. Unknown repositories are
    /// left alone.
    fn update<F>(&self, repo: &RepoName, f: F) -> Result<()>
    where
        F: FnOnce(&mut RepoRecord),
    {
        let Some(mut record) = self.get(repo.as_str())? else {
            return Ok(());
        };
        f(&mut record);
        let mut records = HashMap::new();
        records.insert(record.name.clone(), record);
        self.store(&records)
    }
}

#[async_trait]
impl RepoDatabase for RedbDatabase {
    async fn log_corruption(&self, repo: &RepoName, reason: &str, shard_id: &str) -> Result<()> {
        let now = now_secs();
        self.update(repo, |r| {
            r.shard_id = shard_id.to_string();
            r.push_corruption(reason, now);
        })
    }

    async fn set_clone_status(
        &self,
        repo: &RepoName,
        status: CloneStatus,
        shard_id: &str,
    ) -> Result<()> {
        self.update(repo, |r| {
            r.clone_status = status;
            r.shard_id = shard_id.to_string();
            if status == CloneStatus::Cloned {
                r.corrupted_at = None;
            }
            if status == CloneStatus::NotCloned {
                r.size_bytes = None;
            }
        })
    }

    async fn update_repo_sizes(
        &self,
        shard_id: &str,
        sizes: &HashMap<RepoName, u64>,
    ) -> Result<usize> {
        let mut records = HashMap::new();
        for (name, size) in sizes {
            if let Some(mut record) = self.get(name.as_str())? {
                record.size_bytes = Some(*size);
                record.shard_id = shard_id.to_string();
                records.insert(record.name.clone(), record);
            }
        }
        let updated = records.len();
        self.store(&records)?;
        Ok(updated)
    }

    async fn get_by_name(&self, repo: &RepoName) -> Result<Option<RepoRecord>> {
        self.get(repo.as_str())
    }

    async fn set_last_error(
        &self,
        repo: &RepoName,
        error: Option<&str>,
        shard_id: &str,
    ) -> Result<()> {
        self.update(repo, |r| {
            r.last_error = error.map(str::to_string);
            r.shard_id = shard_id.to_string();
        })
    }
}
