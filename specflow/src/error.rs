//! Typed failures surfaced by the pipeline.
//!
//! Collaborators report `anyhow::Error`; orchestration wraps them into
//! [`FlowError`] so callers can branch on what actually went wrong
//! (configuration, phase failure, policy block, retry exhaustion, cancellation).

use std::path::PathBuf;

use crate::core::types::{CloseResult, Phase, WorkflowResult};
use crate::merge::MergeResult;

pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A builder was finalized without a required collaborator.
    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),

    /// Configuration rejected before any work started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid SPEC id '{0}' (expected SPEC-ISSUE-<positive integer>)")]
    InvalidSpecId(String),

    /// No worktree matches the SPEC id or contains the directory.
    #[error("not in worktree: {0}")]
    NotInWorktree(String),

    #[error("SPEC document not found at {}", .0.display())]
    SpecDocumentMissing(PathBuf),

    #[error("listing worktrees failed")]
    WorktreeList(#[source] anyhow::Error),

    /// A workflow phase failed; `result` holds the skip-cascaded state.
    #[error("{phase} phase failed for {}", .result.spec_id)]
    PhaseFailed {
        phase: Phase,
        result: Box<WorkflowResult>,
        #[source]
        source: anyhow::Error,
    },

    #[error("validator '{validator}' failed")]
    Validator {
        validator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown quality principle '{0}'")]
    UnknownPrinciple(String),

    #[error("fetching PR #{pr} failed")]
    PrFetch {
        pr: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("PR #{pr} is not open (state: {state})")]
    PrNotOpen { pr: u64, state: String },

    #[error("auto-merge was not requested")]
    AutoMergeNotRequested,

    #[error("merge of PR #{pr} blocked: {}", .reasons.join("; "))]
    MergeBlocked { pr: u64, reasons: Vec<String> },

    #[error("merging PR #{pr} failed")]
    MergeFailed {
        pr: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} failed after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A critical issue-closing step failed; `result` records what succeeded.
    #[error("closing issue #{} aborted", .result.issue_number)]
    IssueClose {
        result: CloseResult,
        #[source]
        source: Box<FlowError>,
    },

    /// The PR merged but its issue could not be closed; `merge` records the
    /// merge that happened.
    #[error("PR #{} merged but its issue was not closed", .merge.pr_number)]
    LandIncomplete {
        merge: Box<MergeResult>,
        #[source]
        source: Box<FlowError>,
    },

    #[error("{0} cancelled")]
    Cancelled(String),
}

impl FlowError {
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled(operation.into())
    }

    /// True if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::IssueClose { source, .. } | Self::LandIncomplete { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// The failing phase, for [`FlowError::PhaseFailed`].
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Self::PhaseFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Partial workflow state carried by a phase failure.
    pub fn workflow_result(&self) -> Option<&WorkflowResult> {
        match self {
            Self::PhaseFailed { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Partial issue-closing progress carried by an aborted close.
    pub fn close_result(&self) -> Option<&CloseResult> {
        match self {
            Self::IssueClose { result, .. } => Some(result),
            Self::LandIncomplete { source, .. } => source.close_result(),
            _ => None,
        }
    }

    /// The merge that went through before landing stopped.
    pub fn merge_result(&self) -> Option<&MergeResult> {
        match self {
            Self::LandIncomplete { merge, .. } => Some(merge),
            _ => None,
        }
    }

    /// This error and its sources joined with `: `, for human-facing reasons.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}
