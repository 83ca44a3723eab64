//! [`CodeHost`] adapter backed by the GitHub `gh` CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::core::types::CiOverall;
use crate::io::host::{CheckRun, CheckStatus, CodeHost, MergeMethod, PrDetails};
use crate::io::process::{CommandLimits, run_checked, run_command};

/// Wrapper for executing `gh` commands in a repository checkout.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
    limits: CommandLimits,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            limits: CommandLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: CommandLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("gh");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GH_NO_UPDATE_NOTIFIER", "1")
            .env("GH_PROMPT_DISABLED", "1")
            .env("NO_COLOR", "1");
        cmd
    }

    async fn run(&self, cancel: &CancellationToken, args: &[&str]) -> Result<String> {
        let label = format!("gh {}", args.join(" "));
        let output = run_checked(self.command(args), &label, self.limits, cancel).await?;
        Ok(output.stdout_text())
    }
}

#[derive(Debug, Deserialize)]
struct GhCheck {
    name: String,
    bucket: String,
}

#[async_trait]
impl CodeHost for GhCli {
    #[instrument(skip_all, fields(pr = number))]
    async fn pr_view(&self, cancel: &CancellationToken, number: u64) -> Result<PrDetails> {
        let n = number.to_string();
        let out = self
            .run(cancel, &["pr", "view", &n, "--json", "number,state,mergeable,title"])
            .await?;
        parse_pr_view(&out)
    }

    #[instrument(skip_all, fields(pr = number))]
    async fn pr_checks(&self, cancel: &CancellationToken, number: u64) -> Result<CheckStatus> {
        let n = number.to_string();
        let args = ["pr", "checks", n.as_str(), "--json", "name,bucket"];
        // `gh pr checks` exits non-zero for failing (1) and pending (8) checks
        // while still printing the JSON payload, so the exit code is not checked.
        let output = run_command(self.command(&args), self.limits, cancel)
            .await
            .context("run gh pr checks")?;
        if output.timed_out {
            return Err(anyhow!("gh pr checks timed out after {:?}", self.limits.timeout));
        }
        let stdout = output.stdout_text();
        if stdout.trim().is_empty() {
            let stderr = output.stderr_text();
            if stderr.contains("no checks reported") {
                debug!("no checks reported");
                return Ok(CheckStatus::from_checks(Vec::new()));
            }
            return Err(anyhow!(
                "gh pr checks failed with status {:?}: {stderr}",
                output.status.code()
            ));
        }
        parse_pr_checks(&stdout)
    }

    #[instrument(skip_all, fields(pr = number, method = %method, delete_branch = delete_branch))]
    async fn pr_merge(
        &self,
        cancel: &CancellationToken,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> Result<()> {
        let n = number.to_string();
        let flag = format!("--{}", method.as_str());
        let mut args = vec!["pr", "merge", n.as_str(), flag.as_str()];
        if delete_branch {
            args.push("--delete-branch");
        }
        self.run(cancel, &args).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(issue = issue))]
    async fn issue_comment(&self, cancel: &CancellationToken, issue: u64, body: &str) -> Result<()> {
        let n = issue.to_string();
        self.run(cancel, &["issue", "comment", &n, "--body", body])
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(issue = issue, label = label))]
    async fn issue_add_label(
        &self,
        cancel: &CancellationToken,
        issue: u64,
        label: &str,
    ) -> Result<()> {
        let n = issue.to_string();
        self.run(cancel, &["issue", "edit", &n, "--add-label", label])
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(issue = issue))]
    async fn issue_close(&self, cancel: &CancellationToken, issue: u64) -> Result<()> {
        let n = issue.to_string();
        self.run(cancel, &["issue", "close", &n]).await?;
        Ok(())
    }
}

fn parse_pr_view(json: &str) -> Result<PrDetails> {
    serde_json::from_str(json).context("parse gh pr view json")
}

fn parse_pr_checks(json: &str) -> Result<CheckStatus> {
    let raw: Vec<GhCheck> = serde_json::from_str(json).context("parse gh pr checks json")?;
    let checks = raw
        .into_iter()
        .map(|c| CheckRun {
            status: bucket_status(&c.bucket),
            name: c.name,
        })
        .collect();
    Ok(CheckStatus::from_checks(checks))
}

/// Map a `gh` check bucket onto a CI state. Unknown buckets count as pending.
fn bucket_status(bucket: &str) -> CiOverall {
    match bucket {
        "pass" | "skipping" => CiOverall::Pass,
        "fail" | "cancel" => CiOverall::Fail,
        _ => CiOverall::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pr_view() {
        let pr = parse_pr_view(
            r#"{"mergeable":"MERGEABLE","number":42,"state":"OPEN","title":"feat: add gate"}"#,
        )
        .expect("parse");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.state, "OPEN");
        assert_eq!(pr.mergeable, "MERGEABLE");
    }

    #[test]
    fn parses_pr_view_without_mergeable() {
        let pr = parse_pr_view(r#"{"number":7,"state":"MERGED"}"#).expect("parse");
        assert_eq!(pr.mergeable, "");
    }

    #[test]
    fn parses_checks_buckets() {
        let status = parse_pr_checks(
            r#"[{"name":"build","bucket":"pass"},{"name":"docs","bucket":"skipping"},{"name":"e2e","bucket":"pending"}]"#,
        )
        .expect("parse");
        assert_eq!(status.overall, CiOverall::Pending);
        assert_eq!(status.checks.len(), 3);
        assert_eq!(status.checks[1].status, CiOverall::Pass);
    }

    #[test]
    fn cancelled_check_counts_as_failure() {
        let status = parse_pr_checks(r#"[{"name":"build","bucket":"cancel"}]"#).expect("parse");
        assert_eq!(status.overall, CiOverall::Fail);
    }
}
