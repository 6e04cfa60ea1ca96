use super::fakes::{FakeBackend, MemoryDatabase};
use super::workspace::TestWorkspace;
use anyhow::Result;
use depot_core::{CloneStatus, JanitorReport};

/// Everything an assertion may inspect after a step
pub struct World<'a> {
    pub workspace: &'a TestWorkspace,
    pub backend: &'a FakeBackend,
    pub db: &'a MemoryDatabase,
    pub last_report: Option<&'a JanitorReport>,
}

/// Declarative assertions on store, database and backend state
pub enum Assertion {
    // Store
    RepoExists(String),
    RepoRemoved(String),
    RepoFileExists {
        repo: String,
        path: String,
    },
    RepoFileMissing {
        repo: String,
        path: String,
    },
    RepoFileContains {
        repo: String,
        path: String,
        content: String,
    },

    // Last janitor run
    RemovedInLastRun {
        reason: String,
        count: usize,
    },
    NothingRemovedInLastRun,
    ErrorsInLastRun(usize),
    BusyInLastRun(usize),
    WrongShardInLastRun {
        found: usize,
        deleted: usize,
    },
    LastRunAborted,

    // Database
    CloneStatus {
        repo: String,
        status: CloneStatus,
    },
    CorruptionLogged {
        repo: String,
        count: usize,
    },
    SizeRecorded(String),
    LastErrorContains {
        repo: String,
        text: String,
    },
    NoLastError(String),

    // Backend
    BackendCalls {
        repo: String,
        op: String,
        count: usize,
    },

    // Custom
    Custom(Box<dyn Fn(&World<'_>) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepoExists(r) => write!(f, "RepoExists({:?})", r),
            Self::RepoRemoved(r) => write!(f, "RepoRemoved({:?})", r),
            Self::RepoFileExists { repo, path } => {
                write!(f, "RepoFileExists {{ repo: {:?}, path: {:?} }}", repo, path)
            }
            Self::RepoFileMissing { repo, path } => {
                write!(f, "RepoFileMissing {{ repo: {:?}, path: {:?} }}", repo, path)
            }
            Self::RepoFileContains { repo, path, content } => write!(
                f,
                "RepoFileContains {{ repo: {:?}, path: {:?}, content: {:?} }}",
                repo, path, content
            ),
            Self::RemovedInLastRun { reason, count } => {
                write!(f, "RemovedInLastRun {{ reason: {:?}, count: {} }}", reason, count)
            }
            Self::NothingRemovedInLastRun => write!(f, "NothingRemovedInLastRun"),
            Self::ErrorsInLastRun(n) => write!(f, "ErrorsInLastRun({})", n),
            Self::BusyInLastRun(n) => write!(f, "BusyInLastRun({})", n),
            Self::WrongShardInLastRun { found, deleted } => {
                write!(f, "WrongShardInLastRun {{ found: {}, deleted: {} }}", found, deleted)
            }
            Self::LastRunAborted => write!(f, "LastRunAborted"),
            Self::CloneStatus { repo, status } => {
                write!(f, "CloneStatus {{ repo: {:?}, status: {:?} }}", repo, status)
            }
            Self::CorruptionLogged { repo, count } => {
                write!(f, "CorruptionLogged {{ repo: {:?}, count: {} }}", repo, count)
            }
            Self::SizeRecorded(r) => write!(f, "SizeRecorded({:?})", r),
            Self::LastErrorContains { repo, text } => {
                write!(f, "LastErrorContains {{ repo: {:?}, text: {:?} }}", repo, text)
            }
            Self::NoLastError(r) => write!(f, "NoLastError({:?})", r),
            Self::BackendCalls { repo, op, count } => write!(
                f,
                "BackendCalls {{ repo: {:?}, op: {:?}, count: {} }}",
                repo, op, count
            ),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
