//! Error types for depot_core operations.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Core error type for depot_core operations.
#[derive(Error, Debug)]
pub enum DepotError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific path.
    #[error("I/O error at {}: {}", path.display(), source)]
    PathIo {
        /// Path the operation was acting on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A backend command ran and exited unsuccessfully.
    #[error("command `{command}` failed ({status}): {output}")]
    CommandFailed {
        /// Command line that was executed
        command: String,
        /// Exit status description
        status: String,
        /// Combined stdout/stderr, trimmed
        output: String,
    },

    /// The operation was canceled by the caller or hit its timeout.
    #[error("operation canceled")]
    Canceled,

    /// Repository is not known to the database.
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    /// Database access failed.
    #[error("database error: {0}")]
    Database(String),

    /// Another process holds the maintenance advisory lock.
    #[error("process {pid} on machine {host} is already running a gc operation")]
    GcLockHeld {
        /// PID recorded in the lock file
        pid: String,
        /// Hostname recorded in the lock file
        host: String,
    },

    /// The advisory lock file exists but its holder could not be read.
    #[error("repository locked for gc: {}", path.display())]
    GcLocked {
        /// Path to the lock file
        path: PathBuf,
    },

    /// A coalesced repository update failed.
    #[error("repo {repo}: {source}")]
    Update {
        /// Repository the update ran for
        repo: String,
        /// Error recorded by the update round
        #[source]
        source: Arc<DepotError>,
    },

    /// Another operation holds the repository.
    #[error("repository {repo} is busy: {status}")]
    RepoBusy {
        /// Repository that was requested
        repo: String,
        /// Status text of the current holder
        status: String,
    },

    /// Free-space eviction ran out of repositories to delete.
    #[error("only freed {freed} bytes, wanted to free {wanted}")]
    InsufficientSpace {
        /// Bytes released by the deletions
        freed: u64,
        /// Bytes that had to be released
        wanted: u64,
    },

    /// The background update task ended without reporting a result.
    #[error("update task for {0} ended unexpectedly")]
    UpdateAborted(String),

    /// A janitor step failed for one repository.
    #[error("{step} failed for {repo}: {source}")]
    Step {
        /// Step name as used in metrics
        step: &'static str,
        /// Repository the step ran on
        repo: String,
        /// Underlying error
        #[source]
        source: Box<DepotError>,
    },

    /// Several independent failures collected from one run.
    #[error("{0}")]
    Multiple(ErrorList),
}

impl DepotError {
    /// Returns true if this error (or the error it wraps) is a cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Update { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Returns the combined command output for failed backend commands.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            Self::Update { source, .. } => source.command_output(),
            _ => None,
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::GcLockHeld { .. } | Self::GcLocked { .. } => Some(
                "Another gc or maintenance run owns gc.pid. The janitor removes it once it is older than 24 hours.",
            ),
            Self::ConfigError(_) => {
                Some("Check the config file and DEPOT_* environment variables, then run 'depot config show'.")
            }
            Self::RepoNotFound(_) => {
                Some("The repository is not registered. It is removed from disk only when remove_non_existing_repos is set.")
            }
            Self::CommandFailed { .. } => {
                Some("Run 'depot repo status <name>' to inspect failure counters and corruption state.")
            }
            Self::Database(_) => Some("Database writes are retried on the next janitor run."),
            Self::InsufficientSpace { .. } => {
                Some("Every deletable repository is gone. Grow the disk or lower janitor.desired_percent_free.")
            }
            _ => None,
        }
    }
}

/// Accumulates independent errors so that one failure never hides the rest.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<DepotError>,
}

impl ErrorList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error.
    pub fn push(&mut self, err: DepotError) {
        self.errors.push(err);
    }

    /// Appends the error of `result`, if any, and returns its value.
    pub fn collect<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DepotError> {
        self.errors.iter()
    }

    /// Converts into `Ok(())` when empty, the single error when there is one,
    /// or `DepotError::Multiple` otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(DepotError::Multiple(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl IntoIterator for ErrorList {
    type Item = DepotError;
    type IntoIter = std::vec::IntoIter<DepotError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Convenience Result type for depot_core operations.
pub type Result<T> = std::result::Result<T, DepotError>;
