use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Moves the mtime of one file into the past.
pub fn backdate(path: &Path, by: Duration) -> Result<()> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let file = File::options()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let target = modified.checked_sub(by).unwrap_or(SystemTime::UNIX_EPOCH);
    file.set_modified(target)
        .with_context(|| format!("Failed to set mtime of {}", path.display()))
}

/// Simulates the passing of time for everything the janitor dates by mtime:
/// every regular file below `root` gets older by `by`.
pub fn age_tree(root: &Path, by: Duration) -> Result<()> {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            backdate(entry.path(), by)?;
        }
    }
    Ok(())
}
