//! Client-triggered repository updates.
//!
//! Updates for one repository are coalesced through the
//! [`UpdateCoordinator`] and hold the repository in the
//! [`RepositoryLocker`] while they run.

use crate::backend::Backend;
use crate::coordinator::UpdateCoordinator;
use crate::corruption::output_indicates_corruption;
use crate::db::RepoDatabase;
use crate::error::{DepotError, Result};
use crate::locker::RepositoryLocker;
use crate::repo_dir::{repo_dir_from_name, GitDir, RepoName};
use crate::sentinel;
use crate::store::{remove_tmp_packs, RepoStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs fetches for repositories on request.
#[derive(Clone)]
pub struct RepoUpdater {
    inner: Arc<Inner>,
    coordinator: UpdateCoordinator,
}

struct Inner {
    store: RepoStore,
    backend: Arc<dyn Backend>,
    db: Arc<dyn RepoDatabase>,
    locker: RepositoryLocker,
    shard_id: String,
    long_command_timeout: Duration,
}

impl RepoUpdater {
    pub fn new(
        store: RepoStore,
        backend: Arc<dyn Backend>,
        db: Arc<dyn RepoDatabase>,
        locker: RepositoryLocker,
        shard_id: impl Into<String>,
        long_command_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                db,
                locker,
                shard_id: shard_id.into(),
                long_command_timeout,
            }),
            coordinator: UpdateCoordinator::new(),
        }
    }

    pub fn locker(&self) -> &RepositoryLocker {
        &self.inner.locker
    }

    /// Fetches `repo`, joining an already scheduled update if there is one.
    /// `cancel` only stops this caller from waiting; the fetch itself runs
    /// to completion.
    pub async fn update(
        &self,
        repo: &RepoName,
        revspec: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let inner = self.inner.clone();
        let name = repo.clone();
        let revspec = revspec.map(str::to_string);
        self.coordinator
            .run_exclusive_coalesced(repo, cancel, move || async move {
                inner.run_update(&name, revspec.as_deref()).await
            })
            .await
    }
}

impl Inner {
    async fn run_update(&self, repo: &RepoName, revspec: Option<&str>) -> Result<()> {
        let dir = repo_dir_from_name(self.store.repos_dir(), repo);
        if !dir.as_path().exists() {
            return Err(DepotError::RepoNotFound(repo.to_string()));
        }

        let Some(lock) = self.locker.try_acquire(repo, "starting update") else {
            return Err(DepotError::RepoBusy {
                repo: repo.to_string(),
                status: self.locker.status(repo).unwrap_or_default(),
            });
        };

        lock.set_status("fetching");
        let result = self.fetch(&dir, revspec).await;

        lock.set_status("cleaning up");
        if let Err(e) = remove_tmp_packs(&dir, self.long_command_timeout * 2) {
            debug!(repo = %repo, error = %e, "failed to remove temporary packs");
        }

        let result = match result {
            Ok(()) => {
                lock.set_status("recording last change");
                self.set_last_changed(&dir).await
            }
            Err(e) => {
                self.log_if_corrupt(repo, &dir, &e).await;
                Err(e)
            }
        };
        lock.release();

        let error_text = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self
            .db
            .set_last_error(repo, error_text.as_deref(), &self.shard_id)
            .await
        {
            warn!(repo = %repo, error = %e, "failed to record last update error");
        }

        metrics::counter!("depot_repo_update_total", "success" => result.is_ok().to_string())
            .increment(1);
        if result.is_ok() {
            info!(repo = %repo, "repository updated");
        }
        result
    }

    async fn fetch(&self, dir: &GitDir, revspec: Option<&str>) -> Result<()> {
        match tokio::time::timeout(self.long_command_timeout, self.backend.fetch(dir, revspec)).await {
            Ok(result) => result,
            Err(_) => Err(DepotError::Canceled),
        }
    }

    /// Raises the corruption flag when the failure output looks like a
    /// damaged object store, so the janitor removes the repository.
    async fn log_if_corrupt(&self, repo: &RepoName, dir: &GitDir, err: &DepotError) {
        let Some(output) = err.command_output() else {
            return;
        };
        if !output_indicates_corruption(output) {
            return;
        }
        warn!(repo = %repo, "update output indicates a corrupt repository");
        if let Err(e) = sentinel::raise_corruption_flag(dir, output) {
            warn!(repo = %repo, error = %e, "failed to raise corruption flag");
        }
        if let Err(e) = self.db.log_corruption(repo, output, &self.shard_id).await {
            warn!(repo = %repo, error = %e, "failed to log repo corruption");
        }
    }

    /// Records the ref hash. The first time it is recorded its timestamp is
    /// the latest commit time rather than now.
    async fn set_last_changed(&self, dir: &GitDir) -> Result<()> {
        let hash = self.backend.compute_ref_hash(dir).await?;
        let first_seen = if sentinel::has_ref_hash(dir) {
            None
        } else {
            let stamp = match self.backend.latest_commit_time(dir).await {
                Ok(Some(t)) => t,
                Ok(None) => SystemTime::now(),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "failed to read latest commit time, using now");
                    SystemTime::now()
                }
            };
            Some(stamp)
        };
        if sentinel::update_ref_hash(dir, &hash, first_seen)? {
            debug!(dir = %dir, hash = %hex::encode(&hash), "refs changed");
        }
        Ok(())
    }
}
