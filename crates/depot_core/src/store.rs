//! On-disk repository store: enumeration, removal and size accounting.

use crate::error::{DepotError, ErrorList, Result};
use crate::repo_dir::{is_ignored_path, repo_name_from_dir, GitDir, RepoName, TMP_DIR_NAME};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// The directory tree holding every repository served by this process.
#[derive(Debug, Clone)]
pub struct RepoStore {
    repos_dir: PathBuf,
}

impl RepoStore {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
        }
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    /// Calls `callback` for every repository on disk. A directory named `.git`
    /// is a repository and is not descended into. Unreadable entries are
    /// skipped. Returning `true` from `callback` stops the walk.
    pub fn for_each_repo<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(RepoName, GitDir) -> bool,
    {
        if !self.repos_dir.exists() {
            return Ok(());
        }
        let mut it = WalkDir::new(&self.repos_dir).follow_links(false).into_iter();
        loop {
            let entry = match it.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    debug!(error = %e, "skipping unreadable entry during repo walk");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if is_ignored_path(&self.repos_dir, entry.path()) {
                it.skip_current_dir();
                continue;
            }
            if entry.file_name() != ".git" {
                continue;
            }
            let dir = GitDir::new(entry.path());
            let name = repo_name_from_dir(&self.repos_dir, &dir);
            if callback(name, dir) {
                break;
            }
            it.skip_current_dir();
        }
        Ok(())
    }

    /// Collects every repository on disk.
    pub fn find_repos(&self) -> Result<Vec<(RepoName, GitDir)>> {
        let mut repos = Vec::new();
        self.for_each_repo(|name, dir| {
            repos.push((name, dir));
            false
        })?;
        Ok(repos)
    }

    /// Deletes a repository. The control directory is first renamed into the
    /// scratch directory so that readers never see a half-deleted tree, then
    /// empty parent directories are pruned. Repositories nested below the
    /// removed one's root are left alone. A missing repository is not an
    /// error.
    pub fn remove_repo(&self, dir: &GitDir) -> Result<()> {
        let git_dir = dir.as_path().to_path_buf();
        if !git_dir.exists() {
            return Ok(());
        }

        let tmp_root = self.tmp_dir();
        fs::create_dir_all(&tmp_root).map_err(|source| DepotError::PathIo {
            path: tmp_root.clone(),
            source,
        })?;
        let trash = tmp_root.join(Uuid::new_v4().to_string());
        match fs::rename(&git_dir, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(DepotError::PathIo { path: git_dir, source }),
        }
        fs::remove_dir_all(&trash).map_err(|source| DepotError::PathIo {
            path: trash.clone(),
            source,
        })?;

        self.prune_empty_parents(&git_dir);
        info!(path = %git_dir.display(), "removed repository");
        Ok(())
    }

    /// The scratch directory removals go through.
    pub fn tmp_dir(&self) -> PathBuf {
        self.repos_dir.join(TMP_DIR_NAME)
    }

    /// Deletes whatever earlier removals left in the scratch directory.
    /// Returns the number of entries removed.
    pub fn clear_tmp(&self) -> Result<usize> {
        let tmp_root = self.tmp_dir();
        let entries = match fs::read_dir(&tmp_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(DepotError::PathIo { path: tmp_root, source }),
        };

        let mut errors = ErrorList::new();
        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(t) if t.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => errors.push(DepotError::PathIo { path, source }),
            }
        }
        if removed > 0 {
            debug!(removed, "cleared leftovers from the scratch directory");
        }
        errors.into_result().map(|_| removed)
    }

    fn prune_empty_parents(&self, removed: &Path) {
        let mut current = removed.parent();
        while let Some(p) = current {
            if p == self.repos_dir || !p.starts_with(&self.repos_dir) {
                break;
            }
            // fails on non-empty directories, which ends the climb
            if fs::remove_dir(p).is_err() {
                break;
            }
            current = p.parent();
        }
    }
}

/// Disk capacity of the filesystem holding the store.
pub trait DiskSizer: Send + Sync {
    fn bytes_free(&self, path: &Path) -> Result<u64>;
    fn disk_size(&self, path: &Path) -> Result<u64>;
}

/// [`DiskSizer`] reading the real filesystem statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatDiskSizer;

impl DiskSizer for StatDiskSizer {
    fn bytes_free(&self, path: &Path) -> Result<u64> {
        fs2::available_space(path).map_err(|source| DepotError::PathIo {
            path: path.to_path_buf(),
            source,
        })
    }

    fn disk_size(&self, path: &Path) -> Result<u64> {
        fs2::total_space(path).map_err(|source| DepotError::PathIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Bytes that must be freed below `path` for `desired_percent_free` of the
/// disk to be available. Zero when enough space is already free.
pub fn bytes_to_free(sizer: &dyn DiskSizer, path: &Path, desired_percent_free: u8) -> Result<u64> {
    let free = sizer.bytes_free(path)?;
    let size = sizer.disk_size(path)?;
    let desired = (u128::from(size) * u128::from(desired_percent_free.min(100)) / 100) as u64;
    let needed = desired.saturating_sub(free);
    debug!(
        desired_percent_free,
        actual_percent_free = if size == 0 { 0.0 } else { free as f64 / size as f64 * 100.0 },
        bytes_to_free = needed,
        "checked free disk space"
    );
    Ok(needed)
}

/// Apparent size in bytes of all regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Walks `root` calling `visit` for each entry. A missing root and unreadable
/// entries are skipped. Errors from `visit` are collected and the walk keeps
/// going.
pub fn best_effort_walk<F>(root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&DirEntry) -> Result<()>,
{
    let mut errors = ErrorList::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        errors.collect(visit(&entry));
    }
    errors.into_result()
}

/// Removes `path` if its mtime is at least `max_age` old. Returns whether a
/// stale file was found. A missing file is `Ok(false)`.
pub fn remove_file_older_than(path: &Path, max_age: Duration) -> Result<bool> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(DepotError::PathIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mtime = meta.modified().map_err(|source| DepotError::PathIo {
        path: path.to_path_buf(),
        source,
    })?;
    let age = SystemTime::now().duration_since(mtime).unwrap_or_default();
    if age < max_age {
        return Ok(false);
    }

    debug!(path = %path.display(), age_secs = age.as_secs(), "removing stale file");
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(source) => Err(DepotError::PathIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Removes temporary pack files left by interrupted fetches once they are
/// older than `max_age`.
pub fn remove_tmp_packs(dir: &GitDir, max_age: Duration) -> Result<usize> {
    let pack_dir = dir.path(&["objects", "pack"]);
    let mut removed = 0;
    best_effort_walk(&pack_dir, |entry| {
        if !entry.file_type().is_file() {
            return Ok(());
        }
        let name = entry.file_name().to_string_lossy();
        if !(name.starts_with("tmp_pack_") || name.starts_with(".tmp-")) {
            return Ok(());
        }
        if remove_file_older_than(entry.path(), max_age)? {
            removed += 1;
        }
        Ok(())
    })?;
    Ok(removed)
}
