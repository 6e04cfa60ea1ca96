//! Corruption detection and the reclone policy.

use crate::backend::Backend;
use crate::config::GcConfig;
use crate::error::Result;
use crate::repo_dir::GitDir;
use crate::sentinel;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Repository types whose import is too expensive to redo just because
/// housekeeping keeps failing.
pub const EXPENSIVE_IMPORT_TYPES: &[&str] = &["perforce"];

/// Why a repository is considered corrupt. The string forms are metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionReason {
    /// The `HEAD` file is gone.
    MissingHead,
    /// The repository turned into a working copy.
    NonBare,
    /// A command's output suggested corruption earlier.
    MaybeCorrupt,
}

impl CorruptionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptionReason::MissingHead => "missing-head",
            CorruptionReason::NonBare => "non-bare",
            CorruptionReason::MaybeCorrupt => "maybe-corrupt",
        }
    }

    /// Flag-based corruption was already logged when the flag was raised.
    pub fn should_log_to_db(&self) -> bool {
        !matches!(self, CorruptionReason::MaybeCorrupt)
    }
}

impl fmt::Display for CorruptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the corruption reason, if any. A failed bare-ness check is not
/// treated as corruption. A raised corruption flag is consumed.
pub async fn check_corrupt(backend: &dyn Backend, dir: &GitDir) -> Result<Option<CorruptionReason>> {
    let head = dir.path(&["HEAD"]);
    match std::fs::metadata(&head) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Some(CorruptionReason::MissingHead))
        }
        Err(e) => return Err(e.into()),
    }

    match backend.is_bare(dir).await {
        Ok(false) => return Ok(Some(CorruptionReason::NonBare)),
        Ok(true) => {}
        Err(e) => debug!(dir = %dir, error = %e, "could not check whether repository is bare"),
    }

    if sentinel::consume_corruption_flag(dir) {
        return Ok(Some(CorruptionReason::MaybeCorrupt));
    }
    Ok(None)
}

fn corruption_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?m)^error: (Could not read|packfile) ",
            r"(?m)^fatal: commit-graph requires overflow generation data but has none",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// True if command output contains a line that git only prints for damaged
/// object or commit-graph files.
pub fn output_indicates_corruption(output: &str) -> bool {
    corruption_patterns().iter().any(|re| re.is_match(output))
}

/// What triggered a reclone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecloneTrigger {
    /// Janitor `gc` failed too many times in a row.
    GcFailures { count: u32, gc_log: Option<String> },
    /// The maintenance script failed more often than allowed.
    MaintenanceFailures { count: u32, log: Option<String> },
    /// `git gc` left a log behind and the clone is past the gc time to live.
    GcLog { log: String },
    /// The clone is past its time to live.
    Expired { age: Duration },
}

impl RecloneTrigger {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RecloneTrigger::GcFailures { .. } => "gc_failures",
            RecloneTrigger::MaintenanceFailures { .. } => "maintenance_failures",
            RecloneTrigger::GcLog { .. } => "gc_log",
            RecloneTrigger::Expired { .. } => "expired",
        }
    }
}

impl fmt::Display for RecloneTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecloneTrigger::GcFailures { count, gc_log } => {
                write!(f, "git gc failed {} times", count)?;
                if let Some(log) = gc_log {
                    write!(f, ": {}", log)?;
                }
                Ok(())
            }
            RecloneTrigger::MaintenanceFailures { count, log } => {
                write!(f, "maintenance, too many retries ({})", count)?;
                if let Some(log) = log {
                    write!(f, ": {}", log)?;
                }
                Ok(())
            }
            RecloneTrigger::GcLog { log } => write!(f, "git gc {}", log),
            RecloneTrigger::Expired { age } => {
                write!(f, "cloned {} days ago", age.as_secs() / (24 * 60 * 60))
            }
        }
    }
}

/// Thresholds for [`reclone_trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclonePolicy {
    pub gc_failure_threshold: u32,
    /// Negative disables the maintenance trigger.
    pub maintenance_retries: i32,
    /// Age after which any clone is redone. `None` disables it.
    pub repo_ttl: Option<Duration>,
    /// Age after which a clone with a `gc.log` is redone. `None` disables it.
    pub repo_ttl_gc: Option<Duration>,
}

impl Default for ReclonePolicy {
    fn default() -> Self {
        Self::from_config(&GcConfig::default())
    }
}

impl ReclonePolicy {
    pub fn from_config(gc: &GcConfig) -> Self {
        Self {
            gc_failure_threshold: gc.gc_failure_reclone_threshold,
            maintenance_retries: gc.maintenance_retries,
            repo_ttl: gc.repo_ttl(),
            repo_ttl_gc: gc.repo_ttl_gc(),
        }
    }
}

/// A duration in `[0, d)` derived from `key`, so that repositories cloned
/// together do not all expire together.
pub fn jitter_duration(key: &str, d: Duration) -> Duration {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return Duration::ZERO;
    }
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    let r = u128::from(u64::from_le_bytes(head)) % nanos;
    Duration::new((r / 1_000_000_000) as u64, (r % 1_000_000_000) as u32)
}

/// True if a clone made at `cloned_at` is older than `ttl` plus a quarter
/// of `ttl` worth of jitter.
fn past_ttl(dir: &GitDir, cloned_at: SystemTime, ttl: Option<Duration>) -> bool {
    let Some(ttl) = ttl else {
        return false;
    };
    let age = SystemTime::now().duration_since(cloned_at).unwrap_or_default();
    age > ttl + jitter_duration(&dir.to_string(), ttl / 4)
}

/// Decides from the sentinel files and the clone time whether `dir` should
/// be recloned. Triggers are checked from most to least specific:
/// maintenance failures, gc failures, a gc log on an old clone, then plain
/// age.
pub fn reclone_trigger(
    policy: ReclonePolicy,
    dir: &GitDir,
    repo_type: Option<&str>,
    cloned_at: SystemTime,
) -> Option<RecloneTrigger> {
    if repo_type.is_some_and(|t| EXPENSIVE_IMPORT_TYPES.contains(&t)) {
        return None;
    }

    if policy.maintenance_retries >= 0 {
        let count = sentinel::read_maintenance_failures(dir);
        if i64::from(count) > i64::from(policy.maintenance_retries) {
            return Some(RecloneTrigger::MaintenanceFailures {
                count,
                log: sentinel::read_maintenance_log(dir),
            });
        }
    }

    let count = sentinel::read_gc_failures(dir);
    if count >= policy.gc_failure_threshold {
        return Some(RecloneTrigger::GcFailures {
            count,
            gc_log: sentinel::read_gc_log(dir),
        });
    }

    if past_ttl(dir, cloned_at, policy.repo_ttl_gc) {
        if let Some(log) = sentinel::read_gc_log(dir) {
            return Some(RecloneTrigger::GcLog { log });
        }
    }

    if past_ttl(dir, cloned_at, policy.repo_ttl) {
        let age = SystemTime::now().duration_since(cloned_at).unwrap_or_default();
        return Some(RecloneTrigger::Expired { age });
    }
    None
}
