//! Decides whether a repository's object store needs compaction by looking at
//! its on-disk pack layout, the same way git's own auto heuristics do.

use crate::error::{DepotError, Result};
use crate::repo_dir::GitDir;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Loose objects are sampled from this fan-out directory only.
const LOOSE_OBJECT_SENTINEL_DIR: &str = "17";

/// Why maintenance is (or is not) needed. The string forms are metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceReason {
    Bitmap,
    CommitGraph,
    Packfiles,
    LooseObjects,
    Skipped,
}

impl MaintenanceReason {
    pub fn needed(&self) -> bool {
        !matches!(self, MaintenanceReason::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceReason::Bitmap => "bitmap",
            MaintenanceReason::CommitGraph => "commit_graph",
            MaintenanceReason::Packfiles => "packfiles",
            MaintenanceReason::LooseObjects => "loose_objects",
            MaintenanceReason::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for MaintenanceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for [`needs_maintenance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub auto_pack_limit: usize,
    pub loose_objects_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            auto_pack_limit: 50,
            loose_objects_limit: 1024,
        }
    }
}

/// Checks, in order, for a missing bitmap, a missing commit-graph, too many
/// packfiles and too many loose objects. The first hit wins.
pub fn needs_maintenance(dir: &GitDir, limits: Limits) -> Result<MaintenanceReason> {
    if !has_bitmap(dir)? {
        return Ok(MaintenanceReason::Bitmap);
    }
    if !has_commit_graph(dir)? {
        return Ok(MaintenanceReason::CommitGraph);
    }
    if too_many_packfiles(dir, limits.auto_pack_limit)? {
        return Ok(MaintenanceReason::Packfiles);
    }
    if too_many_loose_objects(dir, limits.loose_objects_limit)? {
        return Ok(MaintenanceReason::LooseObjects);
    }
    Ok(MaintenanceReason::Skipped)
}

/// Lists file names in `path`. A missing directory is empty.
fn file_names(path: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(DepotError::PathIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

pub fn has_bitmap(dir: &GitDir) -> Result<bool> {
    Ok(file_names(&dir.path(&["objects", "pack"]))?
        .iter()
        .any(|n| n.ends_with(".bitmap")))
}

pub fn has_commit_graph(dir: &GitDir) -> Result<bool> {
    let path = dir.path(&["objects", "info", "commit-graph"]);
    match fs::metadata(&path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(DepotError::PathIo { path, source }),
    }
}

/// Counts packfiles that have no sibling `.keep` file.
pub fn too_many_packfiles(dir: &GitDir, limit: usize) -> Result<bool> {
    let names = file_names(&dir.path(&["objects", "pack"]))?;
    let count = names
        .iter()
        .filter_map(|n| n.strip_suffix(".pack"))
        .filter(|stem| !names.iter().any(|n| *n == format!("{stem}.keep")))
        .count();
    Ok(count > limit)
}

/// Estimates the loose object count from a single fan-out directory,
/// assuming objects are spread evenly over all 256 of them.
pub fn too_many_loose_objects(dir: &GitDir, limit: usize) -> Result<bool> {
    let names = file_names(&dir.path(&["objects", LOOSE_OBJECT_SENTINEL_DIR]))?;
    let count = names.iter().filter(|n| is_lower_hex(n)).count();
    Ok(count * 256 > limit)
}

fn is_lower_hex(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
