//! Closing the issue behind a merged SPEC.
//!
//! Three steps, each retried with backoff: post the resolution comment, apply
//! the [`RESOLVED_LABEL`], close the issue. The comment and the close are
//! critical; a label failure is logged and otherwise ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::types::CloseResult;
use crate::error::{FlowError, Result};
use crate::io::host::CodeHost;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, retry};

pub const RESOLVED_LABEL: &str = "resolved";

pub struct IssueCloser {
    host: Arc<dyn CodeHost>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl IssueCloser {
    pub fn new(host: Arc<dyn CodeHost>) -> Self {
        Self {
            host,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Comment on, label and close `issue_number`.
    ///
    /// A critical failure returns [`FlowError::IssueClose`] holding the
    /// progress made so far.
    #[instrument(skip_all, fields(issue = issue_number))]
    pub async fn close(
        &self,
        cancel: &CancellationToken,
        issue_number: u64,
        comment: &str,
    ) -> Result<CloseResult> {
        let mut result = CloseResult::new(issue_number);
        let host = self.host.as_ref();

        retry(&self.policy, self.sleeper.as_ref(), cancel, "post comment", || {
            host.issue_comment(cancel, issue_number, comment)
        })
        .await
        .map_err(|source| abort(result, source))?;
        result.comment_posted = true;

        match retry(&self.policy, self.sleeper.as_ref(), cancel, "add label", || {
            host.issue_add_label(cancel, issue_number, RESOLVED_LABEL)
        })
        .await
        {
            Ok(()) => result.label_added = true,
            Err(err) if err.is_cancelled() => return Err(abort(result, err)),
            Err(err) => warn!(err = %err.chain(), "could not add label, continuing"),
        }

        retry(&self.policy, self.sleeper.as_ref(), cancel, "close issue", || {
            host.issue_close(cancel, issue_number)
        })
        .await
        .map_err(|source| abort(result, source))?;
        result.issue_closed = true;

        info!(label_added = result.label_added, "issue closed");
        Ok(result)
    }
}

fn abort(result: CloseResult, source: FlowError) -> FlowError {
    warn!(
        issue = result.issue_number,
        comment_posted = result.comment_posted,
        label_added = result.label_added,
        err = %source.chain(),
        "closing issue aborted"
    );
    FlowError::IssueClose {
        result,
        source: Box::new(source),
    }
}

/// Default comment posted when a SPEC's PR lands.
pub fn resolution_comment(spec_id: &str, pr_number: u64, merged_at: DateTime<Utc>) -> String {
    format!(
        "Resolved by #{pr_number} ({spec_id}), merged at {}.\n\nClosed automatically after the pull request passed review and merged.",
        merged_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
