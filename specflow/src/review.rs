//! Pull request review: quality verdict plus CI status.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::policy::{CiVerdict, QualityVerdict, is_open, review_decision};
use crate::core::spec_id::parse_spec_id;
use crate::core::types::{CiOverall, Issue, Report, ReviewDecision, Severity};
use crate::error::{FlowError, Result};
use crate::io::host::{CheckStatus, CodeHost, PrDetails};
use crate::quality::QualityGate;

/// Data a caller already fetched, so the reviewer does not fetch it again.
#[derive(Debug, Clone, Default)]
pub struct ReviewInput {
    pub pr: Option<PrDetails>,
    /// `Err` carries the fetch failure message.
    pub checks: Option<std::result::Result<CheckStatus, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub pr_number: u64,
    pub decision: ReviewDecision,
    pub issues: Vec<Issue>,
    pub summary: String,
    /// `None` if the gate could not be invoked.
    pub quality_report: Option<Report>,
}

impl ReviewReport {
    pub fn approved(&self) -> bool {
        self.decision == ReviewDecision::Approve
    }

    /// Passed only when a report exists and it passed.
    pub fn quality_passed(&self) -> bool {
        self.quality_report.as_ref().is_some_and(|r| r.passed)
    }
}

pub struct Reviewer {
    host: Arc<dyn CodeHost>,
    gate: Arc<dyn QualityGate>,
}

impl Reviewer {
    pub fn new(host: Arc<dyn CodeHost>, gate: Arc<dyn QualityGate>) -> Self {
        Self { host, gate }
    }

    /// Review `pr_number` for `spec_id`, judging quality in `work_dir`, the
    /// SPEC's worktree.
    ///
    /// Only a PR fetch failure or a PR that is not open is an error; gate and
    /// CI problems are folded into the decision. Prefetched details for a
    /// different PR are rejected.
    #[instrument(skip_all, fields(pr = pr_number, spec_id = spec_id, work_dir = %work_dir.display()))]
    pub async fn review(
        &self,
        cancel: &CancellationToken,
        pr_number: u64,
        spec_id: &str,
        work_dir: &Path,
        prefetched: Option<ReviewInput>,
    ) -> Result<ReviewReport> {
        parse_spec_id(spec_id)?;
        let prefetched = prefetched.unwrap_or_default();

        let pr = match prefetched.pr {
            Some(pr) if pr.number != pr_number => {
                return Err(FlowError::InvalidConfig(format!(
                    "prefetched details are for PR #{} but PR #{pr_number} is under review",
                    pr.number
                )));
            }
            Some(pr) => pr,
            None => fetch_pr(self.host.as_ref(), cancel, pr_number).await?,
        };
        if !is_open(&pr.state) {
            return Err(FlowError::PrNotOpen {
                pr: pr_number,
                state: pr.state,
            });
        }

        let mut issues = Vec::new();
        let (quality, quality_report) = match self.gate.validate(cancel, work_dir).await {
            Ok(report) => {
                let verdict = if report.passed {
                    QualityVerdict::Passed
                } else {
                    issues.extend(report.issues().cloned());
                    QualityVerdict::Failed
                };
                (verdict, Some(report))
            }
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(err = %err.chain(), "quality gate unavailable");
                issues.push(Issue::general(
                    Severity::Error,
                    "quality-gate",
                    format!("quality gate error: {}", err.chain()),
                ));
                (QualityVerdict::Unavailable, None)
            }
        };

        if quality != QualityVerdict::Passed {
            let decision = review_decision(quality, CiVerdict::Unavailable);
            return Ok(self.finish(&pr, spec_id, decision, issues, quality_report, None));
        }

        let checks = match prefetched.checks {
            Some(checks) => checks,
            None => match self.host.pr_checks(cancel, pr_number).await {
                Ok(status) => Ok(status),
                Err(_) if cancel.is_cancelled() => return Err(FlowError::cancelled("CI status fetch")),
                Err(err) => Err(format!("{err:#}")),
            },
        };
        let ci = match &checks {
            Ok(status) => {
                issues.extend(ci_issues(status));
                CiVerdict::Known(status.overall)
            }
            Err(message) => {
                warn!(err = %message, "CI status unavailable");
                issues.push(Issue::general(
                    Severity::Warning,
                    "ci",
                    format!("CI status unavailable: {message}"),
                ));
                CiVerdict::Unavailable
            }
        };

        let decision = review_decision(quality, ci);
        Ok(self.finish(&pr, spec_id, decision, issues, quality_report, Some(ci)))
    }

    fn finish(
        &self,
        pr: &PrDetails,
        spec_id: &str,
        decision: ReviewDecision,
        issues: Vec<Issue>,
        quality_report: Option<Report>,
        ci: Option<CiVerdict>,
    ) -> ReviewReport {
        let summary = summarize(pr.number, spec_id, decision, quality_report.as_ref(), ci);
        info!(decision = %decision, issues = issues.len(), "review decided");
        ReviewReport {
            pr_number: pr.number,
            decision,
            issues,
            summary,
            quality_report,
        }
    }
}

pub(crate) async fn fetch_pr(
    host: &dyn CodeHost,
    cancel: &CancellationToken,
    pr_number: u64,
) -> Result<PrDetails> {
    match host.pr_view(cancel, pr_number).await {
        Ok(pr) => Ok(pr),
        Err(_) if cancel.is_cancelled() => Err(FlowError::cancelled("PR fetch")),
        Err(source) => Err(FlowError::PrFetch {
            pr: pr_number,
            source,
        }),
    }
}

fn ci_issues(status: &CheckStatus) -> Vec<Issue> {
    match status.overall {
        CiOverall::Pass => Vec::new(),
        CiOverall::Pending => vec![Issue::general(
            Severity::Warning,
            "ci",
            "CI checks are still pending",
        )],
        CiOverall::Fail => status
            .failing()
            .map(|check| {
                Issue::general(Severity::Error, "ci", format!("CI check '{}' failed", check.name))
            })
            .collect(),
    }
}

fn summarize(
    pr_number: u64,
    spec_id: &str,
    decision: ReviewDecision,
    quality: Option<&Report>,
    ci: Option<CiVerdict>,
) -> String {
    let quality = match quality {
        Some(report) if report.passed => format!("passed (score {})", report.score),
        Some(report) => format!("failed (score {})", report.score),
        None => "unavailable".to_string(),
    };
    let ci = match ci {
        Some(CiVerdict::Known(overall)) => overall.to_string(),
        Some(CiVerdict::Unavailable) => "unavailable".to_string(),
        None => "not checked".to_string(),
    };
    format!("{decision} for PR #{pr_number} ({spec_id}): quality {quality}, CI {ci}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PrincipleResult;
    use crate::test_support::{ScriptedGate, ScriptedHost, checks, open_pr};

    const WORK_DIR: &str = "/repo/.worktrees/SPEC-ISSUE-3";

    fn report(passed: bool) -> Report {
        let issues = if passed {
            Vec::new()
        } else {
            vec![Issue::general(Severity::Error, "lint", "unused import")]
        };
        Report::from_principles(vec![PrincipleResult::from_checks(
            "readable",
            &[if passed { 1.0 } else { 0.9 }],
            &[passed],
            issues,
        )])
    }

    async fn review(host: ScriptedHost, gate: ScriptedGate) -> (Result<ReviewReport>, Arc<ScriptedHost>) {
        let host = Arc::new(host);
        let reviewer = Reviewer::new(host.clone(), Arc::new(gate));
        let out = reviewer
            .review(&CancellationToken::new(), 7, "SPEC-ISSUE-3", Path::new(WORK_DIR), None)
            .await;
        (out, host)
    }

    #[tokio::test]
    async fn passing_quality_and_ci_approves() {
        let host = ScriptedHost::new(open_pr(7)).with_checks(Ok(checks(CiOverall::Pass)));
        let (out, host) = review(host, ScriptedGate::report(report(true))).await;
        let report = out.expect("review");
        assert_eq!(report.decision, ReviewDecision::Approve);
        assert!(report.issues.is_empty());
        assert!(report.summary.contains("APPROVE for PR #7 (SPEC-ISSUE-3)"));
        assert_eq!(host.counts().pr_view, 1);
        assert_eq!(host.counts().pr_checks, 1);
    }

    #[tokio::test]
    async fn failing_quality_requests_changes_without_consulting_ci() {
        let host = ScriptedHost::new(open_pr(7)).with_checks(Ok(checks(CiOverall::Pass)));
        let (out, host) = review(host, ScriptedGate::report(report(false))).await;
        let report = out.expect("review");
        assert_eq!(report.decision, ReviewDecision::RequestChanges);
        assert_eq!(report.issues.len(), 1);
        assert!(report.summary.contains("CI not checked"));
        assert_eq!(host.counts().pr_checks, 0);
    }

    #[tokio::test]
    async fn gate_error_requests_changes_with_an_issue() {
        let host = ScriptedHost::new(open_pr(7));
        let (out, _) = review(host, ScriptedGate::error("diagnostics offline")).await;
        let report = out.expect("review");
        assert_eq!(report.decision, ReviewDecision::RequestChanges);
        assert!(report.quality_report.is_none());
        assert!(report.issues[0].message.contains("diagnostics offline"));
        assert!(!report.summary.is_empty());
    }

    #[tokio::test]
    async fn ci_fetch_error_downgrades_to_comment() {
        let host = ScriptedHost::new(open_pr(7)).with_checks(Err("HTTP 502".to_string()));
        let (out, _) = review(host, ScriptedGate::report(report(true))).await;
        let report = out.expect("review");
        assert_eq!(report.decision, ReviewDecision::Comment);
        assert!(report.issues[0].message.contains("HTTP 502"));
    }

    #[tokio::test]
    async fn failing_ci_requests_changes_and_names_checks() {
        let host = ScriptedHost::new(open_pr(7)).with_checks(Ok(checks(CiOverall::Fail)));
        let (out, _) = review(host, ScriptedGate::report(report(true))).await;
        let report = out.expect("review");
        assert_eq!(report.decision, ReviewDecision::RequestChanges);
        assert_eq!(report.issues[0].message, "CI check 'test' failed");
    }

    #[tokio::test]
    async fn pending_ci_comments() {
        let host = ScriptedHost::new(open_pr(7)).with_checks(Ok(checks(CiOverall::Pending)));
        let (out, _) = review(host, ScriptedGate::report(report(true))).await;
        assert_eq!(out.expect("review").decision, ReviewDecision::Comment);
    }

    #[tokio::test]
    async fn closed_pr_is_an_error() {
        let mut pr = open_pr(7);
        pr.state = "MERGED".to_string();
        let (out, _) = review(ScriptedHost::new(pr), ScriptedGate::report(report(true))).await;
        assert!(matches!(out, Err(FlowError::PrNotOpen { pr: 7, .. })));
    }

    #[tokio::test]
    async fn pr_fetch_error_is_fatal() {
        let host = ScriptedHost::new(open_pr(7)).failing_pr_view("gh: not found");
        let (out, _) = review(host, ScriptedGate::report(report(true))).await;
        assert!(matches!(out, Err(FlowError::PrFetch { pr: 7, .. })));
    }

    #[tokio::test]
    async fn prefetched_input_skips_host_calls() {
        let host = Arc::new(ScriptedHost::new(open_pr(7)));
        let reviewer = Reviewer::new(host.clone(), Arc::new(ScriptedGate::report(report(true))));
        let input = ReviewInput {
            pr: Some(open_pr(7)),
            checks: Some(Ok(checks(CiOverall::Pass))),
        };
        let report = reviewer
            .review(&CancellationToken::new(), 7, "SPEC-ISSUE-3", Path::new(WORK_DIR), Some(input))
            .await
            .expect("review");
        assert!(report.approved());
        assert!(report.quality_passed());
        assert_eq!(host.counts().pr_view, 0);
        assert_eq!(host.counts().pr_checks, 0);
    }

    #[tokio::test]
    async fn quality_is_judged_in_the_given_worktree() {
        let host = Arc::new(ScriptedHost::new(open_pr(7)).with_checks(Ok(checks(CiOverall::Pass))));
        let gate = Arc::new(ScriptedGate::report(report(true)));
        let reviewer = Reviewer::new(host, gate.clone());
        reviewer
            .review(&CancellationToken::new(), 7, "SPEC-ISSUE-3", Path::new(WORK_DIR), None)
            .await
            .expect("review");
        assert_eq!(gate.work_dirs(), vec![std::path::PathBuf::from(WORK_DIR)]);
    }

    #[tokio::test]
    async fn prefetched_details_for_another_pr_are_rejected() {
        let host = Arc::new(ScriptedHost::new(open_pr(7)));
        let gate = Arc::new(ScriptedGate::report(report(true)));
        let reviewer = Reviewer::new(host.clone(), gate.clone());
        let input = ReviewInput {
            pr: Some(open_pr(8)),
            checks: Some(Ok(checks(CiOverall::Pass))),
        };
        let err = reviewer
            .review(&CancellationToken::new(), 7, "SPEC-ISSUE-3", Path::new(WORK_DIR), Some(input))
            .await
            .expect_err("mismatch");
        assert!(matches!(err, FlowError::InvalidConfig(ref msg) if msg.contains("PR #8")));
        assert_eq!(gate.calls(), 0);
        assert_eq!(host.counts().pr_view, 0);
    }

    #[tokio::test]
    async fn invalid_spec_id_is_rejected() {
        let (out, host) = review_with_spec("SPEC-ISSUE-x").await;
        assert!(matches!(out, Err(FlowError::InvalidSpecId(_))));
        assert_eq!(host.counts().pr_view, 0);
    }

    async fn review_with_spec(spec_id: &str) -> (Result<ReviewReport>, Arc<ScriptedHost>) {
        let host = Arc::new(ScriptedHost::new(open_pr(7)));
        let reviewer = Reviewer::new(host.clone(), Arc::new(ScriptedGate::report(report(true))));
        let out = reviewer
            .review(&CancellationToken::new(), 7, spec_id, Path::new(WORK_DIR), None)
            .await;
        (out, host)
    }
}
