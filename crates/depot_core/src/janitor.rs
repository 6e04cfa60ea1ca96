//! Periodic janitor: walks every repository on disk and runs an ordered list
//! of repair steps on each.
//!
//! A step either leaves the repository in place (the walk continues with the
//! next step) or reports that it handled the repository completely, usually by
//! deleting it, in which case the remaining steps are skipped. Step failures
//! are logged and collected in the run's [`JanitorReport`] but never stop the
//! walk. Only cancellation does, and it is checked between steps.

use crate::backend::Backend;
use crate::config::{Config, GcMode};
use crate::corruption::{check_corrupt, reclone_trigger, ReclonePolicy};
use crate::db::{CloneStatus, RepoDatabase};
use crate::error::{DepotError, ErrorList, Result};
use crate::heuristics::{needs_maintenance, too_many_loose_objects, Limits};
use crate::locker::RepositoryLocker;
use crate::repo_dir::{GitDir, RepoName};
use crate::sentinel::{self, GcLock};
use crate::shard::{hostname_matches, AddressResolver};
use crate::store::{
    best_effort_walk, bytes_to_free, dir_size, remove_file_older_than, remove_tmp_packs, DiskSizer,
    RepoStore, StatDiskSizer,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Content enforced in `info/attributes`.
const GIT_ATTRIBUTES: &str = "# Managed by depot.

# Every file is part of git archive output.
* -export-ignore
";

const CONFIG_LOCK_MAX_AGE: Duration = Duration::from_secs(60);
const REF_LOCK_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const COMMIT_GRAPH_LOCK_MAX_AGE: Duration = Duration::from_secs(60 * 60);
/// Twice git's own 12 hour convention for `gc.pid`.
const GC_LOCK_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Progress callback: (repositories done, total, current repository).
pub type JanitorProgress = dyn Fn(usize, usize, &str) + Send + Sync;

/// One janitor step. Listed in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorStep {
    /// Delete repositories owned by another shard.
    WrongShard,
    /// Delete repositories that are corrupt.
    RemoveCorrupt,
    /// Delete repositories the database does not know.
    RemoveNonExisting,
    /// Remove lock files left behind by dead processes.
    RemoveStaleLocks,
    /// Enforce `info/attributes`.
    GitAttributes,
    /// Set or unset `gc.auto` according to the GC mode.
    AutoGcConfig,
    /// `git gc --auto`.
    GarbageCollect,
    /// Repack, commit-graph and pack-refs.
    Maintenance,
    /// `git prune` when loose objects pile up.
    Prune,
    /// Delete repositories whose housekeeping keeps failing.
    Reclone,
    /// Recompute the on-disk size.
    SizeAccounting,
}

impl JanitorStep {
    /// Name used in logs and as the `job_name` metric label.
    pub fn name(&self) -> &'static str {
        match self {
            JanitorStep::WrongShard => "wrong_shard_eviction",
            JanitorStep::RemoveCorrupt => "remove_corrupt",
            JanitorStep::RemoveNonExisting => "remove_non_existing",
            JanitorStep::RemoveStaleLocks => "remove_stale_locks",
            JanitorStep::GitAttributes => "set_git_attributes",
            JanitorStep::AutoGcConfig => "set_auto_gc_config",
            JanitorStep::GarbageCollect => "garbage_collect",
            JanitorStep::Maintenance => "maintenance",
            JanitorStep::Prune => "git_prune",
            JanitorStep::Reclone => "maybe_reclone",
            JanitorStep::SizeAccounting => "size_accounting",
        }
    }

    /// Steps that delete the repository. A failure in one of them still ends
    /// the repository's turn.
    fn removes_repo(&self) -> bool {
        matches!(
            self,
            JanitorStep::RemoveCorrupt | JanitorStep::RemoveNonExisting | JanitorStep::Reclone
        )
    }
}

impl std::fmt::Display for JanitorStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one janitor run.
#[derive(Debug, Default)]
pub struct JanitorReport {
    /// Repositories the steps ran on
    pub repos_visited: usize,
    /// Repositories skipped because another operation held them
    pub repos_busy: usize,
    /// Deleted repositories by reason
    pub removed: BTreeMap<String, usize>,
    /// Size updates accepted by the database
    pub sizes_flushed: usize,
    /// Repositories found on this shard that belong to another
    pub wrong_shard_repos: usize,
    /// Bytes used by those repositories
    pub wrong_shard_bytes: u64,
    /// Wrong-shard repositories deleted in this run
    pub wrong_shard_deleted: usize,
    /// Bytes released by free-space eviction
    pub bytes_freed: u64,
    /// Every failure encountered
    pub errors: ErrorList,
    /// The run stopped early because of cancellation
    pub aborted: bool,
    /// Wall-clock time of the run
    pub duration: Duration,
}

impl JanitorReport {
    /// Total number of deleted repositories.
    pub fn removed_total(&self) -> usize {
        self.removed.values().sum()
    }

    fn record_removal(&mut self, reason: &str) {
        *self.removed.entry(reason.to_string()).or_insert(0) += 1;
        metrics::counter!("depot_repos_removed_total", "reason" => reason.to_string()).increment(1);
    }
}

/// Mutable state carried across the repositories of one run.
struct RunState {
    known_shard: bool,
    sizes: HashMap<RepoName, u64>,
    report: JanitorReport,
}

/// Runs the janitor steps over a repository store.
pub struct Janitor {
    config: Config,
    gc_mode: GcMode,
    store: RepoStore,
    backend: Arc<dyn Backend>,
    db: Arc<dyn RepoDatabase>,
    resolver: Arc<dyn AddressResolver>,
    locker: RepositoryLocker,
    disk: Arc<dyn DiskSizer>,
}

impl Janitor {
    pub fn new(
        config: Config,
        store: RepoStore,
        backend: Arc<dyn Backend>,
        db: Arc<dyn RepoDatabase>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        let gc_mode = config.gc_mode();
        Self {
            config,
            gc_mode,
            store,
            backend,
            db,
            resolver,
            locker: RepositoryLocker::new(),
            disk: Arc::new(StatDiskSizer),
        }
    }

    /// Shares a locker with the update path so that the janitor skips
    /// repositories that are being fetched and vice versa.
    pub fn with_locker(mut self, locker: RepositoryLocker) -> Self {
        self.locker = locker;
        self
    }

    /// Replaces the source of disk capacity used by free-space eviction.
    pub fn with_disk_sizer(mut self, disk: Arc<dyn DiskSizer>) -> Self {
        self.disk = disk;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The steps run on every repository, in order.
    pub fn steps(&self) -> Vec<JanitorStep> {
        let mut steps = vec![JanitorStep::WrongShard, JanitorStep::RemoveCorrupt];
        if self.config.janitor.remove_non_existing_repos {
            steps.push(JanitorStep::RemoveNonExisting);
        }
        steps.extend([
            JanitorStep::RemoveStaleLocks,
            JanitorStep::GitAttributes,
            JanitorStep::AutoGcConfig,
        ]);
        match self.gc_mode {
            GcMode::JanitorGcAuto => steps.push(JanitorStep::GarbageCollect),
            GcMode::JanitorMaintenance => {
                steps.extend([JanitorStep::Maintenance, JanitorStep::Prune])
            }
            GcMode::ToolManaged => {}
        }
        if !self.config.janitor.disable_auto_updates {
            steps.push(JanitorStep::Reclone);
        }
        steps.push(JanitorStep::SizeAccounting);
        steps
    }

    /// Runs on a fixed interval until `cancel` fires. Runs never overlap.
    pub async fn run_periodic(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.janitor.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_once(&cancel).await;
            if report.aborted {
                break;
            }
        }
        debug!("janitor stopped");
    }

    /// One pass over every repository.
    pub async fn run_once(&self, cancel: &CancellationToken) -> JanitorReport {
        self.run_once_with_progress(cancel, None).await
    }

    /// Like [`Janitor::run_once`], reporting progress per repository.
    pub async fn run_once_with_progress(
        &self,
        cancel: &CancellationToken,
        progress: Option<&JanitorProgress>,
    ) -> JanitorReport {
        metrics::gauge!("depot_janitor_running").set(1.0);
        let start = Instant::now();

        let shard_id = &self.config.janitor.shard_id;
        let known_shard = self
            .config
            .janitor
            .shard_addrs
            .iter()
            .any(|addr| hostname_matches(shard_id, addr));
        if !known_shard {
            warn!(shard_id = %shard_id, "current shard is not in the known shard list, wrong-shard repositories will not be deleted");
        }

        let mut state = RunState {
            known_shard,
            sizes: HashMap::new(),
            report: JanitorReport::default(),
        };

        if let Err(e) = self.store.clear_tmp() {
            warn!(error = %e, "failed to clear the scratch directory");
            state.report.errors.push(e);
        }

        let mut repos = match self.store.find_repos() {
            Ok(repos) => repos,
            Err(e) => {
                error!(error = %e, "failed to enumerate repositories");
                state.report.errors.push(e);
                Vec::new()
            }
        };

        if self.config.janitor.free_space_eviction {
            if let Err(e) = self.free_up_space(&mut repos, cancel, &mut state).await {
                error!(error = %e, "failed to free up disk space");
                state.report.errors.push(e);
            }
        }

        let steps = self.steps();
        let total = repos.len();
        'repos: for (i, (name, dir)) in repos.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("aborting janitor run");
                state.report.aborted = true;
                break;
            }
            if let Some(cb) = progress {
                cb(i, total, name.as_str());
            }

            let Some(_claim) = self.locker.try_acquire(&name, "janitor") else {
                debug!(repo = %name, "repository busy, skipping");
                state.report.repos_busy += 1;
                continue;
            };
            state.report.repos_visited += 1;

            for step in &steps {
                if cancel.is_cancelled() {
                    warn!(repo = %name, "aborting janitor run");
                    state.report.aborted = true;
                    break 'repos;
                }

                let started = Instant::now();
                let result = self.run_step(*step, &name, &dir, &mut state).await;
                metrics::histogram!(
                    "depot_janitor_job_duration_seconds",
                    "success" => result.is_ok().to_string(),
                    "job_name" => step.name()
                )
                .record(started.elapsed().as_secs_f64());

                match result {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => {
                        error!(step = step.name(), repo = %name, error = %e, "janitor step failed");
                        state.report.errors.push(DepotError::Step {
                            step: step.name(),
                            repo: name.to_string(),
                            source: Box::new(e),
                        });
                        if step.removes_repo() {
                            break;
                        }
                    }
                }
            }
        }
        if let Some(cb) = progress {
            cb(total, total, "");
        }

        if !state.sizes.is_empty() {
            match self.db.update_repo_sizes(shard_id, &state.sizes).await {
                Ok(n) => {
                    state.report.sizes_flushed = n;
                    debug!(updated = n, computed = state.sizes.len(), "flushed repository sizes");
                }
                Err(e) => {
                    error!(error = %e, "failed to update repository sizes");
                    state.report.errors.push(e);
                }
            }
        }

        let mut report = state.report;
        metrics::gauge!("depot_repo_wrong_shard").set(report.wrong_shard_repos as f64);
        metrics::gauge!("depot_repo_wrong_shard_bytes").set(report.wrong_shard_bytes as f64);
        metrics::counter!("depot_repo_wrong_shard_deleted_total").increment(report.wrong_shard_deleted as u64);

        report.duration = start.elapsed();
        metrics::histogram!("depot_janitor_duration_seconds").record(report.duration.as_secs_f64());
        metrics::gauge!("depot_janitor_running").set(0.0);

        info!(
            visited = report.repos_visited,
            removed = report.removed_total(),
            errors = report.errors.len(),
            aborted = report.aborted,
            duration_ms = report.duration.as_millis() as u64,
            "janitor run finished"
        );
        report
    }

    /// Returns `Ok(true)` when the repository is fully handled.
    async fn run_step(
        &self,
        step: JanitorStep,
        name: &RepoName,
        dir: &GitDir,
        state: &mut RunState,
    ) -> Result<bool> {
        match step {
            JanitorStep::WrongShard => self.evict_wrong_shard(name, dir, state),
            JanitorStep::RemoveCorrupt => self.remove_if_corrupt(name, dir, state).await,
            JanitorStep::RemoveNonExisting => self.remove_if_non_existing(name, dir, state).await,
            JanitorStep::RemoveStaleLocks => self.remove_stale_locks(dir).map(|_| false),
            JanitorStep::GitAttributes => set_git_attributes(dir).map(|_| false),
            JanitorStep::AutoGcConfig => self.set_auto_gc_config(dir).await.map(|_| false),
            JanitorStep::GarbageCollect => self.garbage_collect(dir).await.map(|_| false),
            JanitorStep::Maintenance => self.maintenance(name, dir).await.map(|_| false),
            JanitorStep::Prune => self.prune(dir).await.map(|_| false),
            JanitorStep::Reclone => self.maybe_reclone(name, dir, state).await,
            JanitorStep::SizeAccounting => self.account_size(name, dir, state).map(|_| false),
        }
    }

    fn evict_wrong_shard(&self, name: &RepoName, dir: &GitDir, state: &mut RunState) -> Result<bool> {
        let cfg = &self.config.janitor;
        let Some(addr) = self.resolver.addr_for_repo(name, &cfg.shard_addrs) else {
            return Ok(false);
        };
        if hostname_matches(&cfg.shard_id, &addr) {
            return Ok(false);
        }

        let size = dir_size(dir.as_path());
        state.report.wrong_shard_repos += 1;
        state.report.wrong_shard_bytes += size;

        if !state.known_shard || cfg.disable_wrong_shard_eviction {
            return Ok(false);
        }
        if let Some(limit) = cfg.wrong_shard_delete_limit {
            if state.report.wrong_shard_deleted >= limit as usize {
                return Ok(false);
            }
        }

        info!(
            repo = %name,
            target_shard = %addr,
            current_shard = %cfg.shard_id,
            size_bytes = size,
            "removing repository cloned on the wrong shard"
        );
        self.store.remove_repo(dir)?;
        state.report.wrong_shard_deleted += 1;
        state.report.record_removal("wrong_shard");
        Ok(true)
    }

    async fn remove_if_corrupt(&self, name: &RepoName, dir: &GitDir, state: &mut RunState) -> Result<bool> {
        let Some(reason) = check_corrupt(self.backend.as_ref(), dir).await? else {
            return Ok(false);
        };
        let shard_id = &self.config.janitor.shard_id;

        if reason.should_log_to_db() {
            let text = format!("janitor detected a corrupt repository: {}", reason);
            if let Err(e) = self.db.log_corruption(name, &text, shard_id).await {
                warn!(repo = %name, error = %e, "failed to log repository corruption");
            }
        }

        info!(repo = %name, reason = %reason, "removing corrupt repository");
        self.store.remove_repo(dir)?;
        if let Err(e) = self.db.set_clone_status(name, CloneStatus::NotCloned, shard_id).await {
            warn!(repo = %name, error = %e, "failed to set clone status");
        }
        state.report.record_removal(reason.as_str());
        Ok(true)
    }

    async fn remove_if_non_existing(
        &self,
        name: &RepoName,
        dir: &GitDir,
        state: &mut RunState,
    ) -> Result<bool> {
        match self.db.get_by_name(name).await {
            Ok(Some(_)) => Ok(false),
            Err(e) => {
                warn!(repo = %name, error = %e, "failed to look up repository, keeping it");
                Ok(false)
            }
            Ok(None) => {
                info!(repo = %name, "removing repository unknown to the database");
                self.store.remove_repo(dir)?;
                metrics::counter!("depot_non_existing_repos_removed_total").increment(1);
                state.report.record_removal("non_existing");
                Ok(true)
            }
        }
    }

    fn remove_stale_locks(&self, dir: &GitDir) -> Result<()> {
        let mut errors = ErrorList::new();

        errors.collect(remove_file_older_than(&dir.path(&["config.lock"]), CONFIG_LOCK_MAX_AGE));
        errors.collect(remove_file_older_than(&dir.path(&["packed-refs.lock"]), REF_LOCK_MAX_AGE));
        errors.collect(best_effort_walk(&dir.path(&["refs"]), |entry| {
            if entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(".lock") {
                remove_file_older_than(entry.path(), REF_LOCK_MAX_AGE)?;
            }
            Ok(())
        }));
        errors.collect(remove_file_older_than(
            &dir.path(&["objects", "info", "commit-graph.lock"]),
            COMMIT_GRAPH_LOCK_MAX_AGE,
        ));
        errors.collect(remove_tmp_packs(dir, 2 * self.config.commands.long_command_timeout()));

        let gc_lock = dir.path(&[sentinel::GC_LOCK_FILE]);
        if let Some(true) = errors.collect(remove_file_older_than(&gc_lock, GC_LOCK_MAX_AGE)) {
            warn!(path = %gc_lock.display(), "removed stale gc.pid, a gc or maintenance process died without cleaning up");
        }

        errors.into_result()
    }

    async fn set_auto_gc_config(&self, dir: &GitDir) -> Result<()> {
        match self.gc_mode {
            GcMode::JanitorMaintenance => self.backend.config_set(dir, "gc.auto", "0").await,
            _ => self.backend.config_unset(dir, "gc.auto").await,
        }
    }

    async fn garbage_collect(&self, dir: &GitDir) -> Result<()> {
        match self.backend.garbage_collect(dir).await {
            Ok(()) => sentinel::reset_gc_failures(dir),
            Err(e) => {
                if let Err(count_err) = sentinel::increment_gc_failures(dir) {
                    warn!(dir = %dir, error = %count_err, "failed to record gc failure");
                }
                Err(e)
            }
        }
    }

    async fn maintenance(&self, name: &RepoName, dir: &GitDir) -> Result<()> {
        if sentinel::maintenance_log_fresh(dir, self.config.gc.maintenance_log_expiry()) {
            debug!(repo = %name, "recent maintenance failure, skipping");
            return Ok(());
        }

        let limits = Limits {
            auto_pack_limit: self.config.gc.auto_pack_limit,
            loose_objects_limit: self.config.gc.loose_objects_limit,
        };
        let reason = match needs_maintenance(dir, limits) {
            Ok(reason) => reason,
            Err(e) => {
                metrics::counter!("depot_maintenance_status_total", "success" => "false", "reason" => "")
                    .increment(1);
                return Err(e);
            }
        };

        let result = self.run_maintenance(name, dir, reason.needed()).await;
        metrics::counter!(
            "depot_maintenance_status_total",
            "success" => result.is_ok().to_string(),
            "reason" => reason.as_str()
        )
        .increment(1);
        result
    }

    async fn run_maintenance(&self, name: &RepoName, dir: &GitDir, needed: bool) -> Result<()> {
        if !needed {
            return Ok(());
        }
        let _lock = match GcLock::try_acquire(dir) {
            Ok(lock) => lock,
            Err(e) => {
                debug!(repo = %name, error = %e, "could not lock repository for maintenance");
                return Ok(());
            }
        };

        match self.backend.run_maintenance(dir).await {
            Ok(_) => {
                if let Err(e) = sentinel::remove_maintenance_log(dir) {
                    warn!(repo = %name, error = %e, "failed to remove maintenance log");
                }
                Ok(())
            }
            Err(e) => {
                let output = e
                    .command_output()
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                match sentinel::write_maintenance_log(dir, output.as_bytes()) {
                    Ok(failed) => debug!(repo = %name, failed, "recorded maintenance failure"),
                    Err(log_err) => warn!(repo = %name, error = %log_err, "failed to write maintenance log"),
                }
                Err(e)
            }
        }
    }

    async fn prune(&self, dir: &GitDir) -> Result<()> {
        let needed = match too_many_loose_objects(dir, self.config.gc.loose_objects_limit) {
            Ok(needed) => needed,
            Err(e) => {
                metrics::counter!("depot_prune_status_total", "success" => "false", "skipped" => "true")
                    .increment(1);
                return Err(e);
            }
        };
        if !needed {
            metrics::counter!("depot_prune_status_total", "success" => "true", "skipped" => "true")
                .increment(1);
            return Ok(());
        }

        let result = self.backend.prune(dir).await;
        metrics::counter!(
            "depot_prune_status_total",
            "success" => result.is_ok().to_string(),
            "skipped" => "false"
        )
        .increment(1);
        result
    }

    async fn maybe_reclone(&self, name: &RepoName, dir: &GitDir, state: &mut RunState) -> Result<bool> {
        let repo_type = self.backend.repository_type(dir).await?;
        let cloned_at = sentinel::reclone_time(dir)?;
        let policy = ReclonePolicy::from_config(&self.config.gc);
        let Some(trigger) = reclone_trigger(policy, dir, repo_type.as_deref(), cloned_at) else {
            return Ok(false);
        };

        info!(repo = %name, reason = %trigger, "scheduling repository for reclone");
        // if the removal below fails, the next attempt waits half the age again
        let elapsed = SystemTime::now().duration_since(cloned_at).unwrap_or_default();
        if let Err(e) = sentinel::set_reclone_time(dir, cloned_at + elapsed / 2) {
            warn!(repo = %name, error = %e, "failed to back off reclone time");
        }
        let shard_id = &self.config.janitor.shard_id;
        if let Err(e) = self.db.set_clone_status(name, CloneStatus::NotCloned, shard_id).await {
            warn!(repo = %name, error = %e, "failed to set clone status");
        }
        self.store.remove_repo(dir)?;
        metrics::counter!("depot_repos_recloned_total", "reason" => trigger.label()).increment(1);
        state.report.record_removal("reclone");
        Ok(true)
    }

    /// Deletes the least recently changed repositories until the disk has
    /// `desired_percent_free` available. Deleted repositories are taken out
    /// of `repos`. Busy repositories are passed over.
    async fn free_up_space(
        &self,
        repos: &mut Vec<(RepoName, GitDir)>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        let repos_dir = self.store.repos_dir();
        let wanted = bytes_to_free(
            self.disk.as_ref(),
            repos_dir,
            self.config.janitor.desired_percent_free,
        )?;
        if wanted == 0 {
            return Ok(());
        }

        let mut by_age: Vec<(SystemTime, usize)> = repos
            .iter()
            .enumerate()
            .map(|(i, (_, dir))| (last_used(dir), i))
            .collect();
        by_age.sort();

        let shard_id = &self.config.janitor.shard_id;
        let mut errors = ErrorList::new();
        let mut removed = HashSet::new();
        let mut freed = 0u64;
        for (used, i) in by_age {
            if freed >= wanted || cancel.is_cancelled() {
                break;
            }
            let (name, dir) = &repos[i];
            let Some(_claim) = self.locker.try_acquire(name, "freeing disk space") else {
                continue;
            };

            let size = dir_size(dir.as_path());
            if errors.collect(self.store.remove_repo(dir)).is_none() {
                continue;
            }
            if let Err(e) = self.db.set_clone_status(name, CloneStatus::NotCloned, shard_id).await {
                warn!(repo = %name, error = %e, "failed to set clone status");
            }
            freed += size;
            removed.insert(i);
            state.report.record_removal("disk_pressure");

            let free = self.disk.bytes_free(repos_dir).unwrap_or(0);
            warn!(
                repo = %name,
                unchanged_for_secs = SystemTime::now().duration_since(used).unwrap_or_default().as_secs(),
                freed_bytes = freed,
                wanted_bytes = wanted,
                free_bytes = free,
                "removed least recently changed repository to free disk space"
            );
        }
        state.report.bytes_freed = freed;

        let mut index = 0;
        repos.retain(|_| {
            let keep = !removed.contains(&index);
            index += 1;
            keep
        });

        if freed < wanted && !cancel.is_cancelled() {
            errors.push(DepotError::InsufficientSpace { freed, wanted });
        }
        errors.into_result()
    }

    fn account_size(&self, name: &RepoName, dir: &GitDir, state: &mut RunState) -> Result<()> {
        if !sentinel::size_calc_due(dir, self.config.janitor.size_recalc_interval()) {
            return Ok(());
        }
        sentinel::touch_size_calc(dir)?;
        state.sizes.insert(name.clone(), dir_size(dir.as_path()));
        Ok(())
    }
}

/// When the repository last changed: the ref hash stamp, else the mtime of
/// `HEAD`. Unknown sorts first.
fn last_used(dir: &GitDir) -> SystemTime {
    sentinel::last_changed(dir)
        .or_else(|| fs::metadata(dir.path(&["HEAD"])).and_then(|m| m.modified()).ok())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Writes `info/attributes` unless it already has the managed content.
fn set_git_attributes(dir: &GitDir) -> Result<()> {
    let path = dir.path(&["info", "attributes"]);
    if fs::read(&path).map(|c| c == GIT_ATTRIBUTES.as_bytes()).unwrap_or(false) {
        return Ok(());
    }
    let info = dir.path(&["info"]);
    fs::create_dir_all(&info).map_err(|source| DepotError::PathIo { path: info, source })?;
    fs::write(&path, GIT_ATTRIBUTES).map_err(|source| DepotError::PathIo { path, source })
}
