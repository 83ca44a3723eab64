//! Code-host abstraction (pull requests, CI status, issues).
//!
//! The [`CodeHost`] trait decouples review, merge and issue handling from the
//! actual hosting backend. [`crate::io::gh::GhCli`] drives the `gh` CLI;
//! tests use scripted hosts that count calls.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::types::CiOverall;

/// Pull request metadata as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub number: u64,
    /// `OPEN`, `CLOSED` or `MERGED`.
    pub state: String,
    /// `MERGEABLE`, `CONFLICTING`, `UNKNOWN` or empty.
    #[serde(default)]
    pub mergeable: String,
    #[serde(default)]
    pub title: String,
}

/// A single CI check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CiOverall,
}

/// Aggregated CI status of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStatus {
    pub overall: CiOverall,
    pub checks: Vec<CheckRun>,
}

impl CheckStatus {
    /// Aggregate runs: any failure fails, else any pending is pending.
    ///
    /// A PR without checks has nothing to wait for and passes.
    pub fn from_checks(checks: Vec<CheckRun>) -> Self {
        let overall = if checks.iter().any(|c| c.status == CiOverall::Fail) {
            CiOverall::Fail
        } else if checks.iter().any(|c| c.status == CiOverall::Pending) {
            CiOverall::Pending
        } else {
            CiOverall::Pass
        };
        Self { overall, checks }
    }

    pub fn failing(&self) -> impl Iterator<Item = &CheckRun> {
        self.checks.iter().filter(|c| c.status == CiOverall::Fail)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the pipeline needs from the code host.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn pr_view(&self, cancel: &CancellationToken, number: u64) -> Result<PrDetails>;

    async fn pr_checks(&self, cancel: &CancellationToken, number: u64) -> Result<CheckStatus>;

    async fn pr_merge(
        &self,
        cancel: &CancellationToken,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> Result<()>;

    async fn issue_comment(&self, cancel: &CancellationToken, issue: u64, body: &str) -> Result<()>;

    async fn issue_add_label(
        &self,
        cancel: &CancellationToken,
        issue: u64,
        label: &str,
    ) -> Result<()>;

    async fn issue_close(&self, cancel: &CancellationToken, issue: u64) -> Result<()>;
}
