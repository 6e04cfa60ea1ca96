//! Small pieces of per-repository state persisted as files in the control
//! directory.
//!
//! Each file has exactly one responsibility and no file depends on another's
//! format. A missing file always reads as the zero value. Read-modify-write
//! sequences are not atomic across processes, so concurrent janitors may
//! under-count; the counters only feed best-effort heuristics.

use crate::error::{DepotError, Result};
use crate::repo_dir::GitDir;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Touched after each size calculation. Only the mtime matters.
pub const SIZE_CALC_FILE: &str = "depot_size_calc";
/// Decimal count of consecutive janitor GC failures.
pub const GC_FAILURES_FILE: &str = "depot_gc_failures";
/// Header, `failed=<n>` and the output of the last failed maintenance run.
pub const MAINTENANCE_LOG_FILE: &str = "depot_maintenance.log";
/// Advisory lock shared with `git gc`.
pub const GC_LOCK_FILE: &str = "gc.pid";
/// Raised when a command's output suggests corruption.
pub const CORRUPTION_FLAG_FILE: &str = "depot_maybe_corrupt";
/// Last observed ref hash. Its mtime is the last-changed time.
pub const REF_HASH_FILE: &str = "depot_refhash";
/// Written by `git gc` when an auto-gc run fails.
pub const GC_LOG_FILE: &str = "gc.log";
/// Its mtime is when the repository was (re)cloned, as far as the janitor
/// knows.
pub const RECLONE_TIME_FILE: &str = "depot_reclone_time";

const MAINTENANCE_LOG_PREFIX: &str = "failed=";

const MAINTENANCE_LOG_HEADER: &str = "DO NOT EDIT: generated by depot.
This file records the number of failed maintenance runs and the output of
the last one. The count is compared to gc.maintenance_retries to decide
whether the repository should be recloned.";

/// Hostnames are cut to this many bytes, matching git's HOST_NAME_MAX.
const HOST_NAME_MAX: usize = 256;

fn remove_if_exists(path: PathBuf) -> Result<()> {
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DepotError::PathIo { path, source }),
    }
}

fn modified(path: &PathBuf) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn age(t: SystemTime) -> Duration {
    SystemTime::now().duration_since(t).unwrap_or_default()
}

// --- size calculation ---

/// True if the size has never been computed or was computed more than
/// `interval` ago.
pub fn size_calc_due(dir: &GitDir, interval: Duration) -> bool {
    match modified(&dir.path(&[SIZE_CALC_FILE])) {
        Some(t) => age(t) >= interval,
        None => true,
    }
}

/// Records that the size was just computed.
pub fn touch_size_calc(dir: &GitDir) -> Result<()> {
    let path = dir.path(&[SIZE_CALC_FILE]);
    fs::write(&path, b"").map_err(|source| DepotError::PathIo { path, source })
}

// --- gc failure counter ---

/// Current GC failure count. Missing reads as 0, malformed is logged and
/// reads as 0.
pub fn read_gc_failures(dir: &GitDir) -> u32 {
    let path = dir.path(&[GC_FAILURES_FILE]);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read gc failure counter");
            return 0;
        }
    };
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0;
    }
    match trimmed.parse() {
        Ok(n) => n,
        Err(_) => {
            warn!(path = %path.display(), content = trimmed, "malformed gc failure counter, treating as 0");
            0
        }
    }
}

/// Adds one to the GC failure count and returns the new value.
pub fn increment_gc_failures(dir: &GitDir) -> Result<u32> {
    let next = read_gc_failures(dir).saturating_add(1);
    let path = dir.path(&[GC_FAILURES_FILE]);
    fs::write(&path, next.to_string()).map_err(|source| DepotError::PathIo { path, source })?;
    Ok(next)
}

/// Clears the GC failure count. Clearing an absent counter is fine.
pub fn reset_gc_failures(dir: &GitDir) -> Result<()> {
    remove_if_exists(dir.path(&[GC_FAILURES_FILE]))
}

// --- maintenance log ---

/// Extracts the failure count from maintenance log content. The last
/// well-formed `failed=<n>` wins; a malformed or missing value is 0.
pub fn parse_maintenance_failures(content: &[u8]) -> u32 {
    let text = String::from_utf8_lossy(content);
    let mut last = None;
    let mut rest: &str = &text;
    while let Some(idx) = rest.find(MAINTENANCE_LOG_PREFIX) {
        rest = &rest[idx + MAINTENANCE_LOG_PREFIX.len()..];
        let value = rest.split('\n').next().unwrap_or("").trim();
        if let Ok(n) = value.parse::<u32>() {
            last = Some(n);
        }
    }
    last.unwrap_or(0)
}

/// Failure count recorded in the maintenance log, 0 if there is none.
pub fn read_maintenance_failures(dir: &GitDir) -> u32 {
    fs::read(dir.path(&[MAINTENANCE_LOG_FILE]))
        .map(|b| parse_maintenance_failures(&b))
        .unwrap_or(0)
}

/// Full maintenance log content, trimmed. `None` when missing or empty.
pub fn read_maintenance_log(dir: &GitDir) -> Option<String> {
    read_trimmed(dir.path(&[MAINTENANCE_LOG_FILE]))
}

/// Rewrites the maintenance log with the failure count bumped by one and
/// `output` as the tail.
pub fn write_maintenance_log(dir: &GitDir, output: &[u8]) -> Result<u32> {
    let failed = read_maintenance_failures(dir).saturating_add(1);
    let path = dir.path(&[MAINTENANCE_LOG_FILE]);
    let mut content = format!(
        "{}\n\n{}{}\n\n",
        MAINTENANCE_LOG_HEADER, MAINTENANCE_LOG_PREFIX, failed
    )
    .into_bytes();
    content.extend_from_slice(output);
    content.push(b'\n');

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts
        .open(&path)
        .map_err(|source| DepotError::PathIo { path: path.clone(), source })?;
    file.write_all(&content)
        .map_err(|source| DepotError::PathIo { path, source })?;
    Ok(failed)
}

/// Removes the maintenance log after a successful run.
pub fn remove_maintenance_log(dir: &GitDir) -> Result<()> {
    remove_if_exists(dir.path(&[MAINTENANCE_LOG_FILE]))
}

/// True if a maintenance log exists and is younger than `expiry`.
pub fn maintenance_log_fresh(dir: &GitDir, expiry: Duration) -> bool {
    match modified(&dir.path(&[MAINTENANCE_LOG_FILE])) {
        Some(t) => age(t) < expiry,
        None => false,
    }
}

// --- corruption flag ---

/// Marks the repository as possibly corrupt. `reason` is stored for operators.
pub fn raise_corruption_flag(dir: &GitDir, reason: &str) -> Result<()> {
    let path = dir.path(&[CORRUPTION_FLAG_FILE]);
    fs::write(&path, reason).map_err(|source| DepotError::PathIo { path, source })
}

pub fn corruption_flag_raised(dir: &GitDir) -> bool {
    dir.path(&[CORRUPTION_FLAG_FILE]).exists()
}

/// Reports whether the flag was raised and removes it, best-effort.
pub fn consume_corruption_flag(dir: &GitDir) -> bool {
    let path = dir.path(&[CORRUPTION_FLAG_FILE]);
    if !path.exists() {
        return false;
    }
    if let Err(e) = fs::remove_file(&path) {
        debug!(path = %path.display(), error = %e, "failed to clear corruption flag");
    }
    true
}

// --- gc log ---

/// Output of the last failed `git gc`, trimmed. `None` when missing or empty.
pub fn read_gc_log(dir: &GitDir) -> Option<String> {
    read_trimmed(dir.path(&[GC_LOG_FILE]))
}

fn read_trimmed(path: PathBuf) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

// --- ref hash / last changed ---

pub fn has_ref_hash(dir: &GitDir) -> bool {
    dir.path(&[REF_HASH_FILE]).exists()
}

/// Stores `hash` if it differs from the recorded one and reports whether it
/// changed. When the file is created for the first time its mtime is set to
/// `first_seen` if given.
pub fn update_ref_hash(dir: &GitDir, hash: &[u8], first_seen: Option<SystemTime>) -> Result<bool> {
    let path = dir.path(&[REF_HASH_FILE]);
    let existing = match fs::read(&path) {
        Ok(b) => Some(b),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(source) => return Err(DepotError::PathIo { path, source }),
    };
    if existing.as_deref() == Some(hash) {
        return Ok(false);
    }

    // write to a sibling and rename so readers never see a partial hash
    let tmp = dir.path(&[&format!("{}.tmp", REF_HASH_FILE)]);
    fs::write(&tmp, hash).map_err(|source| DepotError::PathIo { path: tmp.clone(), source })?;
    fs::rename(&tmp, &path).map_err(|source| DepotError::PathIo { path: path.clone(), source })?;

    if existing.is_none() {
        if let Some(stamp) = first_seen {
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|source| DepotError::PathIo { path: path.clone(), source })?;
            file.set_modified(stamp)
                .map_err(|source| DepotError::PathIo { path, source })?;
        }
    }
    Ok(true)
}

/// When the refs last changed, or `None` if never recorded.
pub fn last_changed(dir: &GitDir) -> Option<SystemTime> {
    modified(&dir.path(&[REF_HASH_FILE]))
}

// --- reclone time ---

/// Recorded clone time, `None` if never recorded.
pub fn read_reclone_time(dir: &GitDir) -> Option<SystemTime> {
    modified(&dir.path(&[RECLONE_TIME_FILE]))
}

/// Recorded clone time. A repository seen for the first time is stamped with
/// the current time.
pub fn reclone_time(dir: &GitDir) -> Result<SystemTime> {
    if let Some(t) = read_reclone_time(dir) {
        return Ok(t);
    }
    let now = SystemTime::now();
    set_reclone_time(dir, now)?;
    Ok(now)
}

/// Overwrites the recorded clone time.
pub fn set_reclone_time(dir: &GitDir, at: SystemTime) -> Result<()> {
    let path = dir.path(&[RECLONE_TIME_FILE]);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|source| DepotError::PathIo { path: path.clone(), source })?;
    file.set_modified(at)
        .map_err(|source| DepotError::PathIo { path, source })
}

// --- gc advisory lock ---

/// Holder of `gc.pid`. Dropping it (or calling [`GcLock::release`]) removes
/// the lock file.
#[derive(Debug)]
pub struct GcLock {
    file: Option<File>,
    path: PathBuf,
}

impl GcLock {
    /// Creates `gc.pid` exclusively and writes `<pid> <hostname>`. Never
    /// waits: an existing lock is reported immediately.
    pub fn try_acquire(dir: &GitDir) -> Result<GcLock> {
        let path = dir.path(&[GC_LOCK_FILE]);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let mut lock = GcLock {
                    file: None,
                    path: path.clone(),
                };
                write!(file, "{} {}", std::process::id(), local_hostname())
                    .and_then(|_| file.flush())
                    .map_err(|source| DepotError::PathIo { path: path.clone(), source })?;
                file.try_lock_exclusive()
                    .map_err(|_| DepotError::GcLocked { path })?;
                lock.file = Some(file);
                Ok(lock)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(held_error(path)),
            Err(source) => Err(DepotError::PathIo { path, source }),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Releases the lock now instead of on drop.
    pub fn release(mut self) -> Result<()> {
        self.file.take();
        let path = std::mem::take(&mut self.path);
        remove_if_exists(path)
    }
}

impl Drop for GcLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
        }
        if !self.path.as_os_str().is_empty() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn held_error(path: PathBuf) -> DepotError {
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return DepotError::GcLocked { path },
    };
    let mut parts = content.trim().splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(pid), Some(host)) if !pid.is_empty() && !host.is_empty() => DepotError::GcLockHeld {
            pid: pid.to_string(),
            host: host.to_string(),
        },
        _ => DepotError::GcLocked { path },
    }
}

fn local_hostname() -> String {
    let name = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    truncate_hostname(name)
}

fn truncate_hostname(mut name: String) -> String {
    if name.len() > HOST_NAME_MAX {
        let mut cut = HOST_NAME_MAX;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}
