//! Mapping between logical repository names and on-disk directories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Name of the store's reserved scratch directory under `repos_dir`.
pub const TMP_DIR_NAME: &str = ".tmp";

/// Prefix applied to repository names that were soft deleted.
const DELETED_PREFIX: &str = "DELETED-";

/// A normalized logical repository name, e.g. `github.com/foo/bar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoName(String);

impl RepoName {
    /// Normalizes `raw`: trims whitespace and surrounding slashes and drops a
    /// trailing `.git`.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim().trim_matches('/');
        let name = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        RepoName(name.trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strips a soft-delete marker (`DELETED-<digits>-`) from the first
    /// path segment, returning the underlying name.
    pub fn undeleted(&self) -> RepoName {
        let Some(rest) = self.0.strip_prefix(DELETED_PREFIX) else {
            return self.clone();
        };
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return self.clone();
        }
        match rest[digits..].strip_prefix('-') {
            Some(name) if !name.is_empty() => RepoName(name.to_string()),
            _ => self.clone(),
        }
    }

    /// True if the name carries a soft-delete marker.
    pub fn is_soft_deleted(&self) -> bool {
        self.undeleted() != *self
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        RepoName::new(s)
    }
}

/// A repository's control directory (the bare repository root).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitDir(PathBuf);

impl GitDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GitDir(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Joins `parts` below the control directory.
    pub fn path(&self, parts: &[&str]) -> PathBuf {
        let mut p = self.0.clone();
        for part in parts {
            p.push(part);
        }
        p
    }
}

impl AsRef<Path> for GitDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for GitDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// `<repos_dir>/<name>/.git`
pub fn repo_dir_from_name(repos_dir: &Path, name: &RepoName) -> GitDir {
    let mut p = repos_dir.to_path_buf();
    for segment in name.as_str().split('/').filter(|s| !s.is_empty()) {
        p.push(segment);
    }
    p.push(".git");
    GitDir(p)
}

/// Inverse of [`repo_dir_from_name`]. Paths outside `repos_dir` map to the
/// empty name.
pub fn repo_name_from_dir(repos_dir: &Path, dir: &GitDir) -> RepoName {
    let rel = match dir.as_path().strip_prefix(repos_dir) {
        Ok(rel) => rel,
        Err(_) => return RepoName::new(""),
    };
    let segments: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let segments = match segments.split_last() {
        Some((&".git", rest)) => rest,
        _ => &segments[..],
    };
    RepoName::new(segments.join("/"))
}

/// True if `path` lives in the store's reserved scratch directory.
pub fn is_ignored_path(repos_dir: &Path, path: &Path) -> bool {
    path.starts_with(repos_dir.join(TMP_DIR_NAME))
}
