//! Merge prerequisites and the merge itself.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::policy::{is_mergeable, is_open};
use crate::core::types::{CiOverall, PrerequisiteCheck, WorktreeContext};
use crate::error::{FlowError, Result};
use crate::io::config::MergeConfig;
use crate::io::host::{CodeHost, MergeMethod};
use crate::quality::QualityGate;
use crate::review::{ReviewInput, Reviewer, fetch_pr};

/// Per-request merge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// SPEC the PR implements; the reviewer validates against it.
    pub spec_id: String,
    /// The SPEC's worktree, where quality is judged.
    pub work_dir: PathBuf,
    /// Explicit request to merge once prerequisites hold.
    pub auto_merge: bool,
    pub method: MergeMethod,
    pub delete_branch: bool,
    pub require_review: bool,
    pub require_checks: bool,
}

impl MergeOptions {
    /// Options for the worktree's SPEC from config, with auto-merge off.
    pub fn for_worktree(ctx: &WorktreeContext, config: &MergeConfig) -> Self {
        Self {
            spec_id: ctx.spec_id.clone(),
            work_dir: ctx.worktree_dir.clone(),
            auto_merge: false,
            method: config.method,
            delete_branch: config.delete_branch,
            require_review: config.require_review,
            require_checks: config.require_checks,
        }
    }

    pub fn with_auto_merge(mut self, auto_merge: bool) -> Self {
        self.auto_merge = auto_merge;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub pr_number: u64,
    pub method: MergeMethod,
    pub branch_deleted: bool,
    pub merged_at: DateTime<Utc>,
}

pub struct Merger {
    host: Arc<dyn CodeHost>,
    reviewer: Reviewer,
}

impl Merger {
    pub fn new(host: Arc<dyn CodeHost>, gate: Arc<dyn QualityGate>) -> Self {
        Self {
            reviewer: Reviewer::new(host.clone(), gate),
            host,
        }
    }

    /// Evaluate every merge prerequisite.
    ///
    /// The PR is fetched once and CI at most once; both are handed to the
    /// reviewer so it does not fetch them again. A PR fetch failure is an
    /// error, a CI fetch failure only adds a reason.
    #[instrument(skip_all, fields(pr = pr_number, spec_id = %opts.spec_id))]
    pub async fn check_prerequisites(
        &self,
        cancel: &CancellationToken,
        pr_number: u64,
        opts: &MergeOptions,
    ) -> Result<PrerequisiteCheck> {
        let pr = fetch_pr(self.host.as_ref(), cancel, pr_number).await?;
        let mut reasons = Vec::new();

        let open = is_open(&pr.state);
        let mergeable = if !open {
            reasons.push(format!("PR #{pr_number} is not open (state: {})", pr.state));
            false
        } else if !is_mergeable(&pr.mergeable) {
            reasons.push(format!("PR #{pr_number} has merge conflicts"));
            false
        } else {
            true
        };

        let checks = if opts.require_checks {
            match self.host.pr_checks(cancel, pr_number).await {
                Ok(status) => Some(Ok(status)),
                Err(_) if cancel.is_cancelled() => {
                    return Err(FlowError::cancelled("CI status fetch"));
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(err = %message, "CI status fetch failed");
                    reasons.push(format!("CI status fetch failed: {message}"));
                    Some(Err(message))
                }
            }
        } else {
            None
        };
        let checks_passed = match &checks {
            None => true,
            Some(Ok(status)) if status.overall == CiOverall::Pass => true,
            Some(Ok(status)) => {
                reasons.push(format!("CI checks have not passed ({})", status.overall));
                false
            }
            Some(Err(_)) => {
                reasons.push("CI checks have not passed (status unknown)".to_string());
                false
            }
        };

        let (review_approved, quality_passed) = if !opts.require_review {
            (true, true)
        } else if !open {
            reasons.push("review not performed: PR is not open".to_string());
            reasons.push("quality not evaluated: PR is not open".to_string());
            (false, false)
        } else {
            let input = ReviewInput {
                pr: Some(pr.clone()),
                checks: checks.clone(),
            };
            let review = self
                .reviewer
                .review(cancel, pr_number, &opts.spec_id, &opts.work_dir, Some(input))
                .await?;
            if !review.approved() {
                reasons.push(format!("review decision is {}", review.decision));
            }
            if !review.quality_passed() {
                reasons.push("quality gate has not passed".to_string());
            }
            (review.approved(), review.quality_passed())
        };

        if !opts.auto_merge {
            reasons.push("auto-merge not requested".to_string());
        }

        let check = PrerequisiteCheck {
            all_met: false,
            auto_merge_flag: opts.auto_merge,
            review_approved,
            checks_passed,
            quality_passed,
            mergeable,
            failure_reasons: reasons,
        }
        .seal();
        info!(all_met = check.all_met, reasons = check.failure_reasons.len(), "prerequisites evaluated");
        Ok(check)
    }

    /// Merge `pr_number` if auto-merge was requested and every prerequisite holds.
    ///
    /// The merge call is made once; a host error is returned as is.
    #[instrument(skip_all, fields(pr = pr_number, method = %opts.method))]
    pub async fn merge(
        &self,
        cancel: &CancellationToken,
        pr_number: u64,
        opts: &MergeOptions,
    ) -> Result<MergeResult> {
        if !opts.auto_merge {
            return Err(FlowError::AutoMergeNotRequested);
        }
        let check = self.check_prerequisites(cancel, pr_number, opts).await?;
        if !check.all_met {
            warn!(reasons = ?check.failure_reasons, "merge blocked");
            return Err(FlowError::MergeBlocked {
                pr: pr_number,
                reasons: check.failure_reasons,
            });
        }
        if cancel.is_cancelled() {
            return Err(FlowError::cancelled("merge"));
        }

        match self
            .host
            .pr_merge(cancel, pr_number, opts.method, opts.delete_branch)
            .await
        {
            Ok(()) => {}
            Err(_) if cancel.is_cancelled() => return Err(FlowError::cancelled("merge")),
            Err(source) => {
                return Err(FlowError::MergeFailed {
                    pr: pr_number,
                    source,
                });
            }
        }
        info!("pull request merged");
        Ok(MergeResult {
            pr_number,
            method: opts.method,
            branch_deleted: opts.delete_branch,
            merged_at: Utc::now(),
        })
    }
}
