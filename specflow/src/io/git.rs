//! Git adapter for pipeline lookups.
//!
//! The pipeline only reads repository state (worktrees, default branch, last
//! commit), so we keep a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandLimits, CommandOutput, run_checked};

/// Branch assumed when the remote's default branch cannot be resolved.
pub const FALLBACK_BASE_BRANCH: &str = "main";

/// Source of the most recent commit message.
#[async_trait]
pub trait CommitHistory: Send + Sync {
    /// Full message of `HEAD` in the tree checked out at `work_dir`.
    async fn last_commit_message(&self, cancel: &CancellationToken, work_dir: &Path) -> Result<String>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    limits: CommandLimits,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            limits: CommandLimits::default(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Resolve the default branch from `origin`'s symbolic HEAD.
    ///
    /// Falls back to [`FALLBACK_BASE_BRANCH`] when the query fails, returns
    /// nothing, or the directory is not a repository.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub async fn default_branch(&self, cancel: &CancellationToken) -> String {
        match self
            .run_capture(cancel, &["symbolic-ref", "--quiet", "refs/remotes/origin/HEAD"])
            .await
        {
            Ok(out) => match parse_default_branch(&out) {
                Some(branch) => {
                    debug!(branch = %branch, "resolved default branch");
                    branch
                }
                None => {
                    debug!("empty origin HEAD, using fallback");
                    FALLBACK_BASE_BRANCH.to_string()
                }
            },
            Err(err) => {
                debug!(err = %err, "origin HEAD unavailable, using fallback");
                FALLBACK_BASE_BRANCH.to_string()
            }
        }
    }

    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub async fn last_commit_message(&self, cancel: &CancellationToken) -> Result<String> {
        let out = self
            .run_capture(cancel, &["log", "-1", "--format=%B"])
            .await?;
        let message = out.trim().to_string();
        if message.is_empty() {
            warn!("last commit message is empty");
        }
        Ok(message)
    }

    /// Raw `git worktree list --porcelain` output.
    pub async fn worktree_list_porcelain(&self, cancel: &CancellationToken) -> Result<String> {
        self.run_capture(cancel, &["worktree", "list", "--porcelain"])
            .await
    }

    async fn run_capture(&self, cancel: &CancellationToken, args: &[&str]) -> Result<String> {
        let output = self.run_checked(cancel, args).await?;
        Ok(output.stdout_text())
    }

    async fn run_checked(&self, cancel: &CancellationToken, args: &[&str]) -> Result<CommandOutput> {
        if !self.workdir.is_dir() {
            return Err(anyhow!("not a directory: {}", self.workdir.display()));
        }
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let label = format!("git {}", args.join(" "));
        run_checked(cmd, &label, self.limits, cancel).await
    }
}

/// [`CommitHistory`] that runs `git log` in the worktree it is asked about.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitHistory;

#[async_trait]
impl CommitHistory for GitHistory {
    async fn last_commit_message(&self, cancel: &CancellationToken, work_dir: &Path) -> Result<String> {
        Git::new(work_dir).last_commit_message(cancel).await
    }
}

/// Extract `main` from `refs/remotes/origin/main`.
fn parse_default_branch(symbolic_ref: &str) -> Option<String> {
    let trimmed = symbolic_ref.trim();
    let branch = trimmed
        .strip_prefix("refs/remotes/origin/")
        .unwrap_or(trimmed);
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}
