use std::time::Duration;

use super::assertions::Assertion;

/// All possible actions in a test scenario
#[derive(Debug)]
pub enum ScenarioStep {
    // Store setup
    AddRepo {
        name: String,
    },
    Register {
        name: String,
    },
    WriteFile {
        repo: String,
        path: String,
        content: Vec<u8>,
    },
    RemoveFile {
        repo: String,
        path: String,
    },
    AgeFile {
        repo: String,
        path: String,
        by: Duration,
    },

    // Backend and database behavior
    MakeNonBare {
        repo: String,
    },
    SetRepoType {
        repo: String,
        repo_type: String,
    },
    FailGc {
        repo: String,
        output: Option<String>,
    },
    FailMaintenance {
        repo: String,
        output: Option<String>,
    },
    FailFetch {
        repo: String,
        output: Option<String>,
    },
    FailLookups(bool),
    OwnedBy {
        repo: String,
        shard: String,
    },

    // Operations
    RunJanitor,
    RunCancelledJanitor,
    Update {
        repo: String,
        expect_ok: bool,
    },
    HoldLock {
        repo: String,
        status: String,
    },
    ReleaseLock {
        repo: String,
    },

    // Time control
    Wait {
        duration: Duration,
    },

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
