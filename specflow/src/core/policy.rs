//! Review and merge policy tables.
//!
//! The reviewer and merger gather evidence from collaborators; the verdicts
//! themselves are computed here so the decision tables can be tested directly.

use crate::core::types::{CiOverall, Phase, PhaseStatus, ReviewDecision, WorkflowResult};

/// What the quality gate told the reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    Passed,
    Failed,
    /// The gate could not be invoked.
    Unavailable,
}

/// What the code host told the reviewer about CI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiVerdict {
    Known(CiOverall),
    /// The CI status fetch failed.
    Unavailable,
}

/// Review decision table, evaluated in order.
///
/// Quality failure (or an unavailable gate) decides `REQUEST_CHANGES` before CI
/// is consulted. An unknown CI state downgrades to `COMMENT`: uncertain, never
/// approved and never rejected on infrastructure flakiness alone.
pub fn review_decision(quality: QualityVerdict, ci: CiVerdict) -> ReviewDecision {
    match quality {
        QualityVerdict::Failed | QualityVerdict::Unavailable => ReviewDecision::RequestChanges,
        QualityVerdict::Passed => match ci {
            CiVerdict::Unavailable => ReviewDecision::Comment,
            CiVerdict::Known(CiOverall::Fail) => ReviewDecision::RequestChanges,
            CiVerdict::Known(CiOverall::Pending) => ReviewDecision::Comment,
            CiVerdict::Known(CiOverall::Pass) => ReviewDecision::Approve,
        },
    }
}

/// Map the host's mergeable state onto a boolean.
///
/// Only `CONFLICTING` blocks. `UNKNOWN` or empty (host has not computed it yet)
/// is treated as mergeable: the merge call itself is the final arbiter and
/// fails if the host later finds conflicts.
pub fn is_mergeable(state: &str) -> bool {
    !state.trim().eq_ignore_ascii_case("CONFLICTING")
}

/// PR states the reviewer accepts.
pub fn is_open(state: &str) -> bool {
    state.trim().eq_ignore_ascii_case("OPEN")
}

/// Whether a finished workflow may proceed to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeGate {
    Allowed,
    Blocked(Vec<String>),
}

impl MergeGate {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Allowed only when every phase completed and a passing quality report exists.
pub fn merge_gate(result: &WorkflowResult) -> MergeGate {
    let mut reasons: Vec<String> = Phase::ORDER
        .into_iter()
        .filter(|phase| result.status(*phase) != PhaseStatus::Completed)
        .map(|phase| format!("{phase} phase is {}", result.status(phase)))
        .collect();
    match &result.quality_report {
        None => reasons.push("no quality report".to_string()),
        Some(report) if !report.passed => {
            reasons.push(format!("quality gate failed (score {})", report.score));
        }
        Some(_) => {}
    }
    if reasons.is_empty() {
        MergeGate::Allowed
    } else {
        MergeGate::Blocked(reasons)
    }
}
