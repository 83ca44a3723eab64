//! Shared deterministic types for the pipeline.
//!
//! These types define stable contracts between the quality gate, the
//! orchestrator and the PR components. They hold no handles to external state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::score::{mean, round3};

/// Severity of a quality issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding attached to a pillar result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    pub line: u32,
    pub severity: Severity,
    pub message: String,
    pub rule: String,
}

impl Issue {
    /// Issue not tied to a source location (policy checks, flags).
    pub fn general(severity: Severity, rule: &str, message: impl Into<String>) -> Self {
        Self {
            file: String::new(),
            line: 0,
            severity,
            message: message.into(),
            rule: rule.to_string(),
        }
    }

    /// `file:line: message`, as shown in readiness reasons.
    pub fn location_message(&self) -> String {
        format!("{}:{}: {}", self.file, self.line, self.message)
    }
}

/// One of the five quality dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pillar {
    Tested,
    Readable,
    Understandable,
    Secured,
    Trackable,
}

impl Pillar {
    pub const ALL: [Pillar; 5] = [
        Pillar::Tested,
        Pillar::Readable,
        Pillar::Understandable,
        Pillar::Secured,
        Pillar::Trackable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tested => "tested",
            Self::Readable => "readable",
            Self::Understandable => "understandable",
            Self::Secured => "secured",
            Self::Trackable => "trackable",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pillar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pillar::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown pillar '{s}'"))
    }
}

/// Verdict of a single validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleResult {
    pub name: String,
    pub passed: bool,
    /// Mean of sub-check credits, in `[0, 1]`, rounded to three decimals.
    pub score: f64,
    pub issues: Vec<Issue>,
}

impl PrincipleResult {
    /// Build a result from per-check credits and their binary pass conditions.
    ///
    /// `passed` is the AND of `conditions`; the score never decides it.
    pub fn from_checks(name: &str, credits: &[f64], conditions: &[bool], issues: Vec<Issue>) -> Self {
        Self {
            name: name.to_string(),
            passed: conditions.iter().all(|ok| *ok),
            score: round3(mean(credits).clamp(0.0, 1.0)),
            issues,
        }
    }
}

/// Aggregated quality gate verdict. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub passed: bool,
    pub score: f64,
    pub principles: Vec<PrincipleResult>,
}

impl Report {
    pub fn from_principles(principles: Vec<PrincipleResult>) -> Self {
        let scores: Vec<f64> = principles.iter().map(|p| p.score).collect();
        Self {
            passed: principles.iter().all(|p| p.passed),
            score: round3(mean(&scores)),
            principles,
        }
    }

    pub fn principle(&self, name: &str) -> Option<&PrincipleResult> {
        self.principles.iter().find(|p| p.name == name)
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.principles.iter().flat_map(|p| p.issues.iter())
    }

    pub fn error_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues().filter(|i| i.severity == Severity::Error)
    }
}

/// Workflow phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Run,
    Sync,
}

impl Phase {
    pub const ORDER: [Phase; 3] = [Phase::Plan, Phase::Run, Phase::Sync];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Run => "run",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one SPEC workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub spec_id: String,
    pub plan_status: PhaseStatus,
    pub run_status: PhaseStatus,
    pub sync_status: PhaseStatus,
    /// `None` when the gate was not reached or could not be invoked.
    pub quality_report: Option<Report>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowResult {
    pub fn new(spec_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            plan_status: PhaseStatus::Pending,
            run_status: PhaseStatus::Pending,
            sync_status: PhaseStatus::Pending,
            quality_report: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn status(&self, phase: Phase) -> PhaseStatus {
        match phase {
            Phase::Plan => self.plan_status,
            Phase::Run => self.run_status,
            Phase::Sync => self.sync_status,
        }
    }

    pub fn set_status(&mut self, phase: Phase, status: PhaseStatus) {
        match phase {
            Phase::Plan => self.plan_status = status,
            Phase::Run => self.run_status = status,
            Phase::Sync => self.sync_status = status,
        }
    }

    /// Mark `phase` failed and every later phase skipped.
    pub fn fail_at(&mut self, phase: Phase) {
        self.set_status(phase, PhaseStatus::Failed);
        for later in Phase::ORDER.into_iter().skip_while(|p| *p != phase).skip(1) {
            self.set_status(later, PhaseStatus::Skipped);
        }
    }

    pub fn all_completed(&self) -> bool {
        Phase::ORDER
            .into_iter()
            .all(|p| self.status(p) == PhaseStatus::Completed)
    }
}

/// Live view of the worktree bound to a SPEC. Recomputed on each lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeContext {
    pub spec_id: String,
    pub worktree_dir: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub issue_number: u64,
}

/// Whether a SPEC's worktree is ready to be proposed for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReadiness {
    pub ready: bool,
    pub quality_passed: bool,
    pub quality_report: Option<Report>,
    pub failure_reasons: Vec<String>,
}

/// Overall CI state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiOverall {
    Pass,
    Fail,
    Pending,
}

impl fmt::Display for CiOverall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Pending => "pending",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::RequestChanges => "REQUEST_CHANGES",
            Self::Comment => "COMMENT",
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating merge prerequisites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteCheck {
    pub all_met: bool,
    pub auto_merge_flag: bool,
    pub review_approved: bool,
    pub checks_passed: bool,
    pub quality_passed: bool,
    pub mergeable: bool,
    pub failure_reasons: Vec<String>,
}

impl PrerequisiteCheck {
    /// Recompute `all_met` from the five booleans.
    pub fn seal(mut self) -> Self {
        self.all_met = self.auto_merge_flag
            && self.review_approved
            && self.checks_passed
            && self.quality_passed
            && self.mergeable;
        self
    }
}

/// Partial-progress record of closing an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseResult {
    pub issue_number: u64,
    pub comment_posted: bool,
    pub label_added: bool,
    pub issue_closed: bool,
}

impl CloseResult {
    pub fn new(issue_number: u64) -> Self {
        Self {
            issue_number,
            comment_posted: false,
            label_added: false,
            issue_closed: false,
        }
    }
}
