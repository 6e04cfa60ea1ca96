//! In-process stand-ins for git, the database and the shard map.

use async_trait::async_trait;
use depot_core::{
    repo_name_from_dir, AddressResolver, Backend, CloneStatus, CorruptionLog, DepotError, GitDir,
    RepoDatabase, RepoName, RepoRecord, Result, REPO_TYPE_CONFIG_KEY,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default, Clone)]
struct Behavior {
    non_bare: bool,
    gc_failure: Option<String>,
    maintenance_failure: Option<String>,
    fetch_failure: Option<String>,
    repo_type: Option<String>,
}

/// Backend that records calls and fails on request. Successful maintenance
/// writes a bitmap and a commit-graph so later runs find nothing to do.
pub struct FakeBackend {
    repos_dir: PathBuf,
    behavior: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    pub fn new(repos_dir: PathBuf) -> Self {
        Self {
            repos_dir,
            behavior: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn update(&self, repo: &str, f: impl FnOnce(&mut Behavior)) {
        f(self.behavior.lock().entry(RepoName::new(repo).to_string()).or_default());
    }

    pub fn set_non_bare(&self, repo: &str) {
        self.update(repo, |b| b.non_bare = true);
    }

    pub fn fail_gc(&self, repo: &str, output: Option<&str>) {
        self.update(repo, |b| b.gc_failure = output.map(str::to_string));
    }

    pub fn fail_maintenance(&self, repo: &str, output: Option<&str>) {
        self.update(repo, |b| b.maintenance_failure = output.map(str::to_string));
    }

    pub fn fail_fetch(&self, repo: &str, output: Option<&str>) {
        self.update(repo, |b| b.fetch_failure = output.map(str::to_string));
    }

    pub fn set_repo_type(&self, repo: &str, repo_type: &str) {
        self.update(repo, |b| b.repo_type = Some(repo_type.to_string()));
    }

    /// Number of recorded calls of `op` for `repo`.
    pub fn call_count(&self, repo: &str, op: &str) -> usize {
        let repo = RepoName::new(repo).to_string();
        self.calls
            .lock()
            .iter()
            .filter(|(r, o)| *r == repo && o == op)
            .count()
    }

    fn lookup(&self, dir: &GitDir, op: &str) -> (String, Behavior) {
        let name = repo_name_from_dir(&self.repos_dir, dir).to_string();
        self.calls.lock().push((name.clone(), op.to_string()));
        let behavior = self.behavior.lock().get(&name).cloned().unwrap_or_default();
        (name, behavior)
    }

    fn failed(command: &str, output: &str) -> DepotError {
        DepotError::CommandFailed {
            command: command.to_string(),
            status: "exit status: 128".to_string(),
            output: output.to_string(),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn is_bare(&self, dir: &GitDir) -> Result<bool> {
        let (_, b) = self.lookup(dir, "is_bare");
        Ok(!b.non_bare)
    }

    async fn config_get(&self, dir: &GitDir, key: &str) -> Result<Option<String>> {
        let (_, b) = self.lookup(dir, "config_get");
        Ok(if key == REPO_TYPE_CONFIG_KEY { b.repo_type } else { None })
    }

    async fn config_set(&self, dir: &GitDir, key: &str, value: &str) -> Result<()> {
        self.lookup(dir, &format!("config_set {}={}", key, value));
        Ok(())
    }

    async fn config_unset(&self, dir: &GitDir, key: &str) -> Result<()> {
        self.lookup(dir, &format!("config_unset {}", key));
        Ok(())
    }

    async fn garbage_collect(&self, dir: &GitDir) -> Result<()> {
        let (_, b) = self.lookup(dir, "gc");
        match b.gc_failure {
            Some(output) => Err(Self::failed("git gc --auto", &output)),
            None => Ok(()),
        }
    }

    async fn run_maintenance(&self, dir: &GitDir) -> Result<Vec<u8>> {
        let (_, b) = self.lookup(dir, "maintenance");
        if let Some(output) = b.maintenance_failure {
            return Err(Self::failed("git repack -d -l -A --write-bitmap-index", &output));
        }
        fs::write(dir.path(&["objects", "pack", "pack-1.bitmap"]), b"")?;
        fs::write(dir.path(&["objects", "info", "commit-graph"]), b"")?;
        Ok(b"maintenance done".to_vec())
    }

    async fn prune(&self, dir: &GitDir) -> Result<()> {
        self.lookup(dir, "prune");
        Ok(())
    }

    async fn compute_ref_hash(&self, dir: &GitDir) -> Result<Vec<u8>> {
        self.lookup(dir, "compute_ref_hash");
        Ok(fs::read(dir.path(&["refs", "heads", "main"]))?)
    }

    async fn latest_commit_time(&self, dir: &GitDir) -> Result<Option<SystemTime>> {
        self.lookup(dir, "latest_commit_time");
        Ok(None)
    }

    async fn fetch(&self, dir: &GitDir, _revspec: Option<&str>) -> Result<()> {
        let (_, b) = self.lookup(dir, "fetch");
        match b.fetch_failure {
            Some(output) => Err(Self::failed("git fetch origin", &output)),
            None => Ok(()),
        }
    }
}

/// Database kept in memory. Lookups can be made to fail.
#[derive(Default)]
pub struct MemoryDatabase {
    records: Mutex<HashMap<String, RepoRecord>>,
    fail_lookups: AtomicBool,
}

impl MemoryDatabase {
    pub fn register(&self, repo: &str, shard_id: &str) {
        let name = RepoName::new(repo);
        let mut record = RepoRecord::new(&name);
        record.clone_status = CloneStatus::Cloned;
        record.shard_id = shard_id.to_string();
        self.records.lock().insert(name.to_string(), record);
    }

    pub fn record(&self, repo: &str) -> Option<RepoRecord> {
        self.records.lock().get(RepoName::new(repo).as_str()).cloned()
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    fn with_record(&self, repo: &RepoName, f: impl FnOnce(&mut RepoRecord)) {
        if let Some(record) = self.records.lock().get_mut(repo.as_str()) {
            f(record);
        }
    }
}

#[async_trait]
impl RepoDatabase for MemoryDatabase {
    async fn log_corruption(&self, repo: &RepoName, reason: &str, _shard_id: &str) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.with_record(repo, |r| {
            r.corruption_logs.insert(
                0,
                CorruptionLog {
                    timestamp: now,
                    reason: reason.to_string(),
                },
            );
            r.corrupted_at = Some(now);
        });
        Ok(())
    }

    async fn set_clone_status(&self, repo: &RepoName, status: CloneStatus, shard_id: &str) -> Result<()> {
        self.with_record(repo, |r| {
            r.clone_status = status;
            r.shard_id = shard_id.to_string();
        });
        Ok(())
    }

    async fn update_repo_sizes(&self, _shard_id: &str, sizes: &HashMap<RepoName, u64>) -> Result<usize> {
        let mut records = self.records.lock();
        let mut updated = 0;
        for (name, size) in sizes {
            if let Some(r) = records.get_mut(name.as_str()) {
                r.size_bytes = Some(*size);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn get_by_name(&self, repo: &RepoName) -> Result<Option<RepoRecord>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DepotError::Database("connection reset by peer".into()));
        }
        Ok(self.records.lock().get(repo.as_str()).cloned())
    }

    async fn set_last_error(&self, repo: &RepoName, error: Option<&str>, _shard_id: &str) -> Result<()> {
        self.with_record(repo, |r| r.last_error = error.map(str::to_string));
        Ok(())
    }
}

/// Assigns repositories to shards explicitly. Unlisted repositories belong
/// to `default_owner`.
pub struct ShardMap {
    default_owner: String,
    owners: Mutex<HashMap<String, String>>,
}

impl ShardMap {
    pub fn new(default_owner: &str) -> Self {
        Self {
            default_owner: default_owner.to_string(),
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn assign(&self, repo: &str, owner: &str) {
        self.owners
            .lock()
            .insert(RepoName::new(repo).to_string(), owner.to_string());
    }
}

impl AddressResolver for ShardMap {
    fn addr_for_repo(&self, repo: &RepoName, _addrs: &[String]) -> Option<String> {
        Some(
            self.owners
                .lock()
                .get(repo.as_str())
                .cloned()
                .unwrap_or_else(|| self.default_owner.clone()),
        )
    }
}
