//! In-process registry of repositories that have an operation in progress.
//!
//! At most one [`RepositoryLock`] exists per repository. Acquisition never
//! blocks: a held repository is reported immediately so the caller can back
//! off.

use crate::repo_dir::RepoName;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registry of held repositories and their status text.
#[derive(Debug, Clone, Default)]
pub struct RepositoryLocker {
    status: Arc<Mutex<BTreeMap<RepoName, String>>>,
}

impl RepositoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `repo`. Returns `None` if it is already claimed.
    pub fn try_acquire(&self, repo: &RepoName, initial_status: impl Into<String>) -> Option<RepositoryLock> {
        let mut status = self.status.lock();
        if status.contains_key(repo) {
            return None;
        }
        status.insert(repo.clone(), initial_status.into());
        Some(RepositoryLock {
            locker: self.clone(),
            repo: repo.clone(),
            released: AtomicBool::new(false),
        })
    }

    /// Status text of a held repository.
    pub fn status(&self, repo: &RepoName) -> Option<String> {
        self.status.lock().get(repo).cloned()
    }

    /// Snapshot of every held repository and its status.
    pub fn all_statuses(&self) -> BTreeMap<RepoName, String> {
        self.status.lock().clone()
    }
}

/// Exclusive claim on one repository. Released on drop.
#[derive(Debug)]
pub struct RepositoryLock {
    locker: RepositoryLocker,
    repo: RepoName,
    released: AtomicBool,
}

impl RepositoryLock {
    pub fn repo(&self) -> &RepoName {
        &self.repo
    }

    /// Updates the status text. Does nothing after release.
    pub fn set_status(&self, text: impl Into<String>) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        let mut status = self.locker.status.lock();
        if let Some(entry) = status.get_mut(&self.repo) {
            *entry = text.into();
        }
    }

    /// Releases the claim. Calling it again is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.locker.status.lock().remove(&self.repo);
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        self.release();
    }
}
