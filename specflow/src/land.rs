//! Land a SPEC: merge its pull request, then close the originating issue.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::types::{CloseResult, WorktreeContext};
use crate::error::{FlowError, Result};
use crate::issue::{IssueCloser, resolution_comment};
use crate::merge::{MergeOptions, MergeResult, Merger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandResult {
    pub merge: MergeResult,
    pub close: CloseResult,
}

pub struct Lander {
    merger: Merger,
    closer: IssueCloser,
}

impl Lander {
    pub fn new(merger: Merger, closer: IssueCloser) -> Self {
        Self { merger, closer }
    }

    /// Merge `pr_number` and close `ctx.issue_number` with the default
    /// resolution comment. Nothing is closed if the merge fails; if closing
    /// fails after the merge, [`FlowError::LandIncomplete`] carries the merge.
    #[instrument(skip_all, fields(spec_id = %ctx.spec_id, pr = pr_number))]
    pub async fn land(
        &self,
        cancel: &CancellationToken,
        ctx: &WorktreeContext,
        pr_number: u64,
        opts: &MergeOptions,
    ) -> Result<LandResult> {
        if opts.spec_id != ctx.spec_id || opts.work_dir != ctx.worktree_dir {
            return Err(FlowError::InvalidConfig(format!(
                "merge options are for {} at {} but the worktree is {} at {}",
                opts.spec_id,
                opts.work_dir.display(),
                ctx.spec_id,
                ctx.worktree_dir.display()
            )));
        }
        let merge = self.merger.merge(cancel, pr_number, opts).await?;
        let comment = resolution_comment(&ctx.spec_id, pr_number, merge.merged_at);
        let close = match self.closer.close(cancel, ctx.issue_number, &comment).await {
            Ok(close) => close,
            Err(source) => {
                warn!(issue = ctx.issue_number, "PR merged but the issue is still open");
                return Err(FlowError::LandIncomplete {
                    merge: Box::new(merge),
                    source: Box::new(source),
                });
            }
        };
        info!(issue = ctx.issue_number, "SPEC landed");
        Ok(LandResult { merge, close })
    }
}
