//! Five-pillar quality gate.
//!
//! A [`Gate`] holds an ordered list of [`Validator`]s, one per pillar, and
//! folds their [`PrincipleResult`]s into a [`Report`]. Every run is bound to
//! the worktree being judged: validators read it through an [`Evidence`]
//! value, which collects diagnostics once per run and shares them.
//!
//! Validators report business failures (lint errors, missing coverage) as low
//! scores and issues; they only return `Err` when they cannot evaluate at all,
//! e.g. the diagnostics source is unreachable. Such an error aborts the run.

mod readable;
mod secured;
mod tested;
mod trackable;
mod understandable;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Pillar, PrincipleResult, Report};
use crate::error::{FlowError, Result};
use crate::io::config::QualityConfig;
use crate::io::diagnostics::{Diagnostic, DiagnosticsSource};
use crate::io::git::CommitHistory;

pub use readable::ReadableValidator;
pub use secured::SecuredValidator;
pub use tested::TestedValidator;
pub use trackable::TrackableValidator;
pub use understandable::UnderstandableValidator;

/// One quality pillar check.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(
        &self,
        cancel: &CancellationToken,
        evidence: &Evidence,
    ) -> anyhow::Result<PrincipleResult>;
}

/// Capability the orchestrator and reviewer depend on.
#[async_trait]
pub trait QualityGate: Send + Sync {
    /// Judge the tree checked out at `work_dir`.
    async fn validate(&self, cancel: &CancellationToken, work_dir: &Path) -> Result<Report>;
}

/// What one gate run reads from one worktree.
pub struct Evidence {
    work_dir: PathBuf,
    diagnostics: Arc<dyn DiagnosticsSource>,
    commits: Arc<dyn CommitHistory>,
    collected: OnceCell<Vec<Diagnostic>>,
}

impl Evidence {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        diagnostics: Arc<dyn DiagnosticsSource>,
        commits: Arc<dyn CommitHistory>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            diagnostics,
            commits,
            collected: OnceCell::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Diagnostics for the worktree, collected on first use.
    pub async fn diagnostics(&self, cancel: &CancellationToken) -> anyhow::Result<&[Diagnostic]> {
        let collected = self
            .collected
            .get_or_try_init(|| self.diagnostics.collect_diagnostics(cancel, &self.work_dir))
            .await?;
        Ok(collected.as_slice())
    }

    pub async fn last_commit_message(&self, cancel: &CancellationToken) -> anyhow::Result<String> {
        self.commits.last_commit_message(cancel, &self.work_dir).await
    }
}

/// Project facts the validators need besides diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSignals {
    /// Current test coverage in percent.
    pub coverage: f64,
    pub docs_complete: bool,
    pub complexity_acceptable: bool,
    pub structured_logging: bool,
    pub diagnostic_history: bool,
}

impl Default for ProjectSignals {
    fn default() -> Self {
        Self {
            coverage: 0.0,
            docs_complete: true,
            complexity_acceptable: true,
            structured_logging: true,
            diagnostic_history: true,
        }
    }
}

/// Ordered set of validators plus the sources they read.
pub struct Gate {
    validators: Vec<Arc<dyn Validator>>,
    diagnostics: Arc<dyn DiagnosticsSource>,
    commits: Arc<dyn CommitHistory>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("validators", &self.names())
            .finish_non_exhaustive()
    }
}

impl Gate {
    pub fn new(
        validators: Vec<Arc<dyn Validator>>,
        diagnostics: Arc<dyn DiagnosticsSource>,
        commits: Arc<dyn CommitHistory>,
    ) -> Result<Self> {
        if validators.is_empty() {
            return Err(FlowError::InvalidConfig(
                "quality gate needs at least one validator".to_string(),
            ));
        }
        Ok(Self {
            validators,
            diagnostics,
            commits,
        })
    }

    /// Build the configured pillars, in configured order.
    pub fn from_config(
        config: &QualityConfig,
        signals: &ProjectSignals,
        diagnostics: Arc<dyn DiagnosticsSource>,
        commits: Arc<dyn CommitHistory>,
    ) -> Result<Self> {
        let validators = config
            .pillars
            .iter()
            .map(|pillar| -> Arc<dyn Validator> {
                match pillar {
                    Pillar::Tested => Arc::new(TestedValidator::new(
                        config.coverage_target,
                        signals.coverage,
                    )),
                    Pillar::Readable => Arc::new(ReadableValidator),
                    Pillar::Understandable => Arc::new(UnderstandableValidator::new(
                        config.warning_threshold,
                        signals.docs_complete,
                        signals.complexity_acceptable,
                    )),
                    Pillar::Secured => Arc::new(SecuredValidator),
                    Pillar::Trackable => Arc::new(TrackableValidator::new(
                        signals.structured_logging,
                        signals.diagnostic_history,
                    )),
                }
            })
            .collect();
        Self::new(validators, diagnostics, commits)
    }

    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    fn evidence(&self, work_dir: &Path) -> Evidence {
        Evidence::new(work_dir, self.diagnostics.clone(), self.commits.clone())
    }

    /// Run a single validator by pillar name against `work_dir`.
    #[instrument(skip_all, fields(principle = name, work_dir = %work_dir.display()))]
    pub async fn validate_principle(
        &self,
        cancel: &CancellationToken,
        work_dir: &Path,
        name: &str,
    ) -> Result<PrincipleResult> {
        let validator = self
            .validators
            .iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| FlowError::UnknownPrinciple(name.to_string()))?;
        run_validator(validator.as_ref(), cancel, &self.evidence(work_dir)).await
    }
}

#[async_trait]
impl QualityGate for Gate {
    #[instrument(skip_all, fields(validators = self.validators.len(), work_dir = %work_dir.display()))]
    async fn validate(&self, cancel: &CancellationToken, work_dir: &Path) -> Result<Report> {
        let evidence = self.evidence(work_dir);
        let mut principles = Vec::with_capacity(self.validators.len());
        for validator in &self.validators {
            principles.push(run_validator(validator.as_ref(), cancel, &evidence).await?);
        }
        let report = Report::from_principles(principles);
        info!(passed = report.passed, score = report.score, "quality gate evaluated");
        Ok(report)
    }
}

async fn run_validator(
    validator: &dyn Validator,
    cancel: &CancellationToken,
    evidence: &Evidence,
) -> Result<PrincipleResult> {
    if cancel.is_cancelled() {
        return Err(FlowError::cancelled("quality validation"));
    }
    match validator.validate(cancel, evidence).await {
        Ok(result) => {
            debug!(
                principle = validator.name(),
                passed = result.passed,
                score = result.score,
                issues = result.issues.len(),
                "principle evaluated"
            );
            Ok(result)
        }
        Err(_) if cancel.is_cancelled() => Err(FlowError::cancelled("quality validation")),
        Err(source) => {
            warn!(principle = validator.name(), err = %source, "validator failed");
            Err(FlowError::Validator {
                validator: validator.name().to_string(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::test_support::{StaticCommits, StaticDiagnostics, diagnostic};

    const WORK_DIR: &str = "/repo/.worktrees/SPEC-ISSUE-5";

    fn gate(diagnostics: StaticDiagnostics, commit: &str, config: &QualityConfig) -> Gate {
        Gate::from_config(
            config,
            &ProjectSignals::default(),
            Arc::new(diagnostics),
            Arc::new(StaticCommits::new(commit)),
        )
        .expect("gate")
    }

    async fn validate(gate: &Gate) -> Result<Report> {
        gate.validate(&CancellationToken::new(), Path::new(WORK_DIR))
            .await
    }

    #[tokio::test]
    async fn clean_project_passes_every_pillar() {
        let gate = gate(
            StaticDiagnostics::new(Vec::new()),
            "feat(gate): add validators",
            &QualityConfig::default(),
        );
        let report = validate(&gate).await.expect("report");
        assert!(report.passed);
        assert_eq!(report.score, 1.0);
        let names: Vec<&str> = report.principles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["tested", "readable", "understandable", "secured", "trackable"]
        );
    }

    #[tokio::test]
    async fn one_failing_pillar_fails_the_report() {
        let gate = gate(
            StaticDiagnostics::new(vec![diagnostic("lint", Severity::Warning, "unused")]),
            "fix: tidy",
            &QualityConfig::default(),
        );
        let report = validate(&gate).await.expect("report");
        assert!(!report.passed);
        assert!(!report.principle("readable").expect("readable").passed);
        assert!(report.principle("secured").expect("secured").passed);
        assert_eq!(report.score, 0.98);
    }

    #[tokio::test]
    async fn each_run_judges_the_directory_it_is_given() {
        let diagnostics = StaticDiagnostics::new(Vec::new()).with_dir(
            "/repo/.worktrees/SPEC-ISSUE-1",
            vec![diagnostic("security", Severity::Error, "hardcoded token")],
        );
        let dirs = diagnostics.dirs();
        let gate = gate(diagnostics, "feat: x", &QualityConfig::default());
        let cancel = CancellationToken::new();

        let dirty = gate
            .validate(&cancel, Path::new("/repo/.worktrees/SPEC-ISSUE-1"))
            .await
            .expect("report");
        let clean = gate
            .validate(&cancel, Path::new("/repo/.worktrees/SPEC-ISSUE-2"))
            .await
            .expect("report");

        assert!(!dirty.passed);
        assert!(clean.passed);
        assert_eq!(
            dirs.get(),
            vec![
                PathBuf::from("/repo/.worktrees/SPEC-ISSUE-1"),
                PathBuf::from("/repo/.worktrees/SPEC-ISSUE-2"),
            ]
        );
    }

    #[tokio::test]
    async fn diagnostics_are_collected_once_per_run() {
        let diagnostics = StaticDiagnostics::new(Vec::new());
        let calls = diagnostics.calls();
        let gate = gate(diagnostics, "feat: x", &QualityConfig::default());
        validate(&gate).await.expect("first run");
        assert_eq!(calls.get(), 1);
        validate(&gate).await.expect("second run");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn diagnostics_outage_is_a_hard_error() {
        let gate = gate(
            StaticDiagnostics::unreachable("connection refused"),
            "feat: x",
            &QualityConfig::default(),
        );
        let err = validate(&gate).await.expect_err("outage");
        assert!(matches!(err, FlowError::Validator { ref validator, .. } if validator == "tested"));
    }

    #[tokio::test]
    async fn validate_principle_runs_only_the_named_pillar() {
        let diagnostics = StaticDiagnostics::new(Vec::new());
        let calls = diagnostics.calls();
        let gate = gate(diagnostics, "feat: x", &QualityConfig::default());
        let result = gate
            .validate_principle(&CancellationToken::new(), Path::new(WORK_DIR), "secured")
            .await
            .expect("secured");
        assert_eq!(result.name, "secured");
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn unknown_principle_is_rejected() {
        let gate = gate(StaticDiagnostics::new(Vec::new()), "feat: x", &QualityConfig::default());
        let err = gate
            .validate_principle(&CancellationToken::new(), Path::new(WORK_DIR), "fast")
            .await
            .expect_err("unknown");
        assert!(matches!(err, FlowError::UnknownPrinciple(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_validator() {
        let diagnostics = StaticDiagnostics::new(Vec::new());
        let calls = diagnostics.calls();
        let gate = gate(diagnostics, "feat: x", &QualityConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gate
            .validate(&cancel, Path::new(WORK_DIR))
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn empty_validator_list_is_a_config_error() {
        let err = Gate::new(
            Vec::new(),
            Arc::new(StaticDiagnostics::new(Vec::new())),
            Arc::new(StaticCommits::new("feat: x")),
        )
        .expect_err("empty");
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn gate_follows_configured_pillar_order() {
        let config = QualityConfig {
            pillars: vec![Pillar::Trackable, Pillar::Tested],
            ..QualityConfig::default()
        };
        let gate = gate(StaticDiagnostics::new(Vec::new()), "feat: x", &config);
        assert_eq!(gate.names(), vec!["trackable", "tested"]);
    }
}
