//! Version-control backend.
//!
//! The janitor and updater never run git themselves; they go through
//! [`Backend`], which reports failures as [`DepotError::CommandFailed`] and
//! cancellations or timeouts as [`DepotError::Canceled`].

use crate::error::{DepotError, Result};
use crate::repo_dir::GitDir;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::debug;

/// Config key holding the repository's declared type (e.g. `perforce`).
pub const REPO_TYPE_CONFIG_KEY: &str = "depot.type";

/// Primitive repository operations.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Whether the repository is bare. `Err` means the check itself failed.
    async fn is_bare(&self, dir: &GitDir) -> Result<bool>;

    /// Reads a config key. `Ok(None)` if the key is unset.
    async fn config_get(&self, dir: &GitDir, key: &str) -> Result<Option<String>>;

    async fn config_set(&self, dir: &GitDir, key: &str, value: &str) -> Result<()>;

    /// Unsets a config key. Unsetting a missing key is not an error.
    async fn config_unset(&self, dir: &GitDir, key: &str) -> Result<()>;

    /// The declared repository type, if any.
    async fn repository_type(&self, dir: &GitDir) -> Result<Option<String>> {
        self.config_get(dir, REPO_TYPE_CONFIG_KEY).await
    }

    /// Runs `gc --auto` with aggressive thresholds, synchronously.
    async fn garbage_collect(&self, dir: &GitDir) -> Result<()>;

    /// Runs the maintenance tasks and returns their combined output.
    async fn run_maintenance(&self, dir: &GitDir) -> Result<Vec<u8>>;

    /// Removes all unreachable loose objects.
    async fn prune(&self, dir: &GitDir) -> Result<()>;

    /// Hash over every ref and its target. Changes whenever a ref moves.
    async fn compute_ref_hash(&self, dir: &GitDir) -> Result<Vec<u8>>;

    /// Commit time of the most recent commit, `None` if there are no commits.
    async fn latest_commit_time(&self, dir: &GitDir) -> Result<Option<SystemTime>>;

    /// Fetches from the repository's origin. `revspec` narrows the fetch.
    async fn fetch(&self, dir: &GitDir, revspec: Option<&str>) -> Result<()>;
}

/// [`Backend`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    git: PathBuf,
    timeout: Duration,
}

impl GitCli {
    /// Commands are killed after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            git: PathBuf::from("git"),
            timeout,
        }
    }

    /// Use a specific git binary.
    pub fn with_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Runs git in `dir` and returns its output regardless of exit status.
    async fn output(&self, dir: &GitDir, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .current_dir(dir.as_path())
            .env("GIT_DIR", dir.as_path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(dir = %dir, args = ?args, "running git");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DepotError::Canceled),
        }
    }

    /// Runs git in `dir` and fails unless it exits successfully.
    async fn run(&self, dir: &GitDir, args: &[&str]) -> Result<Output> {
        let output = self.output(dir, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_failed(args, &output))
        }
    }
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim().to_string()
}

fn command_failed(args: &[&str], output: &Output) -> DepotError {
    DepotError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        status: output.status.to_string(),
        output: combined(output),
    }
}

/// Parses the first line of `rev-list --timestamp`. Times in the future are
/// ignored.
fn parse_commit_timestamp(stdout: &str) -> Option<SystemTime> {
    let secs: u64 = stdout.split_whitespace().next()?.parse().ok()?;
    let t = UNIX_EPOCH + Duration::from_secs(secs);
    (t <= SystemTime::now()).then_some(t)
}

const MAINTENANCE_TASKS: &[&[&str]] = &[
    &["repack", "-d", "-l", "-A", "--write-bitmap-index"],
    &["commit-graph", "write", "--reachable", "--changed-paths"],
    &["pack-refs", "--all", "--prune"],
];

#[async_trait]
impl Backend for GitCli {
    async fn is_bare(&self, dir: &GitDir) -> Result<bool> {
        let output = self.run(dir, &["rev-parse", "--is-bare-repository"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() != "false")
    }

    async fn config_get(&self, dir: &GitDir, key: &str) -> Result<Option<String>> {
        let args = ["config", "--get", key];
        let output = self.output(dir, &args).await?;
        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string())),
            // exit 1: key not set
            Some(1) => Ok(None),
            _ => Err(command_failed(&args, &output)),
        }
    }

    async fn config_set(&self, dir: &GitDir, key: &str, value: &str) -> Result<()> {
        self.run(dir, &["config", key, value]).await?;
        Ok(())
    }

    async fn config_unset(&self, dir: &GitDir, key: &str) -> Result<()> {
        let args = ["config", "--unset-all", key];
        let output = self.output(dir, &args).await?;
        match output.status.code() {
            // exit 5: key not set
            Some(0) | Some(5) => Ok(()),
            _ => Err(command_failed(&args, &output)),
        }
    }

    async fn garbage_collect(&self, dir: &GitDir) -> Result<()> {
        self.run(
            dir,
            &["-c", "gc.auto=1", "-c", "gc.autoDetach=false", "gc", "--auto"],
        )
        .await?;
        Ok(())
    }

    async fn run_maintenance(&self, dir: &GitDir) -> Result<Vec<u8>> {
        let mut log = Vec::new();
        for args in MAINTENANCE_TASKS {
            let output = self.output(dir, args).await?;
            log.extend_from_slice(&output.stdout);
            log.extend_from_slice(&output.stderr);
            if !output.status.success() {
                return Err(DepotError::CommandFailed {
                    command: format!("git {}", args.join(" ")),
                    status: output.status.to_string(),
                    output: String::from_utf8_lossy(&log).trim().to_string(),
                });
            }
        }
        Ok(log)
    }

    async fn prune(&self, dir: &GitDir) -> Result<()> {
        self.run(dir, &["prune", "--expire", "now"]).await?;
        Ok(())
    }

    async fn compute_ref_hash(&self, dir: &GitDir) -> Result<Vec<u8>> {
        let args = ["show-ref"];
        let output = self.output(dir, &args).await?;
        // exit 1 with no output: repository has no refs yet
        if !output.status.success() && !(output.status.code() == Some(1) && output.stdout.is_empty())
        {
            return Err(command_failed(&args, &output));
        }
        Ok(blake3::hash(&output.stdout).as_bytes().to_vec())
    }

    async fn latest_commit_time(&self, dir: &GitDir) -> Result<Option<SystemTime>> {
        let output = self
            .run(dir, &["rev-list", "--all", "--timestamp", "-n", "1"])
            .await?;
        Ok(parse_commit_timestamp(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn fetch(&self, dir: &GitDir, revspec: Option<&str>) -> Result<()> {
        let mut args = vec!["fetch", "--prune", "--no-tags", "origin"];
        match revspec {
            Some(rev) => args.push(rev),
            None => args.push("+refs/heads/*:refs/heads/*"),
        }
        self.run(dir, &args).await?;
        Ok(())
    }
}
