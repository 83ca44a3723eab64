//! Worktree orchestration: SPEC lookup and the Plan → Run → Sync workflow.
//!
//! Worktree state is never cached; every lookup lists the repository's
//! worktrees afresh, so a worktree created or removed between calls is seen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::spec_id::{is_valid_spec_id, parse_spec_id};
use crate::core::types::{Phase, PhaseStatus, ReviewReadiness, WorkflowResult, WorktreeContext};
use crate::error::{FlowError, Result};
use crate::io::config::WorkflowConfig;
use crate::io::executor::{PhaseExecutor, execute_phase};
use crate::io::git::Git;
use crate::io::worktree::{WorktreeEntry, WorktreeLister};
use crate::quality::QualityGate;
use crate::reporter::{NullReporter, WorkflowReporter};

pub use crate::core::policy::{MergeGate, merge_gate};

/// File name of the SPEC document inside `<spec_dir>/<SPEC-ID>/`.
pub const SPEC_DOCUMENT: &str = "spec.md";

pub struct Orchestrator {
    worktrees: Arc<dyn WorktreeLister>,
    executor: Arc<dyn PhaseExecutor>,
    gate: Arc<dyn QualityGate>,
    reporter: Arc<dyn WorkflowReporter>,
    spec_dir: PathBuf,
}

/// Assembles an [`Orchestrator`]; worktrees, executor and gate are required.
pub struct OrchestratorBuilder {
    worktrees: Option<Arc<dyn WorktreeLister>>,
    executor: Option<Arc<dyn PhaseExecutor>>,
    gate: Option<Arc<dyn QualityGate>>,
    reporter: Arc<dyn WorkflowReporter>,
    spec_dir: PathBuf,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            worktrees: None,
            executor: None,
            gate: None,
            reporter: Arc::new(NullReporter),
            spec_dir: WorkflowConfig::default().spec_dir,
        }
    }
}

impl OrchestratorBuilder {
    pub fn worktrees(mut self, worktrees: Arc<dyn WorktreeLister>) -> Self {
        self.worktrees = Some(worktrees);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn WorkflowReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn workflow_config(mut self, config: &WorkflowConfig) -> Self {
        self.spec_dir = config.spec_dir.clone();
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        Ok(Orchestrator {
            worktrees: self.worktrees.ok_or(FlowError::MissingDependency("worktree lister"))?,
            executor: self.executor.ok_or(FlowError::MissingDependency("phase executor"))?,
            gate: self.gate.ok_or(FlowError::MissingDependency("quality gate"))?,
            reporter: self.reporter,
            spec_dir: self.spec_dir,
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Drive Plan, Run and Sync for `spec_id`, checking the worktree's quality
    /// after Run.
    ///
    /// A failed phase returns [`FlowError::PhaseFailed`] carrying the partial
    /// result with every later phase skipped. A quality gate error is logged
    /// and leaves `quality_report` empty.
    #[instrument(skip_all, fields(spec_id = spec_id))]
    pub async fn execute_workflow(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
    ) -> Result<WorkflowResult> {
        parse_spec_id(spec_id)?;
        let worktree = self.find_worktree(cancel, spec_id).await?;
        let mut result = WorkflowResult::new(spec_id, Utc::now());
        info!(worktree = %worktree.path.display(), "workflow started");

        for phase in Phase::ORDER {
            self.run_phase(cancel, phase, &worktree.path, &mut result)
                .await?;
            if phase == Phase::Run {
                self.evaluate_quality(cancel, &worktree.path, &mut result)
                    .await?;
            }
        }

        result.completed_at = Some(Utc::now());
        info!(
            quality_passed = result.quality_report.as_ref().map(|r| r.passed),
            "workflow completed"
        );
        Ok(result)
    }

    async fn run_phase(
        &self,
        cancel: &CancellationToken,
        phase: Phase,
        work_dir: &Path,
        result: &mut WorkflowResult,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(FlowError::cancelled(format!("{phase} phase")));
        }
        result.set_status(phase, PhaseStatus::Running);
        self.reporter.phase_started(&result.spec_id, phase);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = execute_phase(self.executor.as_ref(), phase, cancel, &result.spec_id, work_dir) => Some(outcome),
        };
        match outcome {
            Some(Ok(())) => {
                result.set_status(phase, PhaseStatus::Completed);
                self.reporter.phase_completed(&result.spec_id, phase);
                Ok(())
            }
            Some(Err(_)) | None if cancel.is_cancelled() => {
                Err(FlowError::cancelled(format!("{phase} phase")))
            }
            Some(Err(source)) => {
                result.fail_at(phase);
                self.reporter.phase_failed(&result.spec_id, phase, &source);
                Err(FlowError::PhaseFailed {
                    phase,
                    result: Box::new(result.clone()),
                    source,
                })
            }
            None => Err(FlowError::cancelled(format!("{phase} phase"))),
        }
    }

    async fn evaluate_quality(
        &self,
        cancel: &CancellationToken,
        work_dir: &Path,
        result: &mut WorkflowResult,
    ) -> Result<()> {
        match self.gate.validate(cancel, work_dir).await {
            Ok(report) => {
                self.reporter.quality_evaluated(&result.spec_id, &report);
                result.quality_report = Some(report);
                Ok(())
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                warn!(err = %err.chain(), "quality gate unavailable, continuing without report");
                Ok(())
            }
        }
    }

    /// Resolve the SPEC worktree that equals or contains `dir`.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn detect_worktree_context(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
    ) -> Result<WorktreeContext> {
        let dir = canonical(dir);
        let entries = self.list(cancel).await?;
        let entry = entries
            .iter()
            .map(|entry| (canonical(&entry.path), entry))
            .filter(|(path, _)| dir.starts_with(path))
            .max_by_key(|(path, _)| path.components().count())
            .map(|(_, entry)| entry)
            .ok_or_else(|| FlowError::NotInWorktree(dir.display().to_string()))?;

        let spec_id = entry
            .basename()
            .ok_or_else(|| FlowError::NotInWorktree(entry.path.display().to_string()))?;
        let issue_number = parse_spec_id(spec_id)?;

        let spec_doc = entry
            .path
            .join(&self.spec_dir)
            .join(spec_id)
            .join(SPEC_DOCUMENT);
        if !spec_doc.is_file() {
            return Err(FlowError::SpecDocumentMissing(spec_doc));
        }

        let base_branch = Git::new(&entry.path).default_branch(cancel).await;
        debug!(spec_id, branch = %entry.branch, base_branch = %base_branch, "detected worktree");
        Ok(WorktreeContext {
            spec_id: spec_id.to_string(),
            worktree_dir: entry.path.clone(),
            branch: entry.branch.clone(),
            base_branch,
            issue_number,
        })
    }

    /// Judge the SPEC's worktree and decide whether it can go to review.
    #[instrument(skip_all, fields(spec_id = spec_id))]
    pub async fn prepare_for_review(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
    ) -> Result<ReviewReadiness> {
        parse_spec_id(spec_id)?;
        let worktree = self.find_worktree(cancel, spec_id).await?;

        let report = match self.gate.validate(cancel, &worktree.path).await {
            Ok(report) => report,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(err = %err.chain(), "quality gate unavailable");
                return Ok(ReviewReadiness {
                    ready: false,
                    quality_passed: false,
                    quality_report: None,
                    failure_reasons: vec![format!("quality gate error: {}", err.chain())],
                });
            }
        };

        let failure_reasons: Vec<String> = if report.passed {
            Vec::new()
        } else {
            report.error_issues().map(|i| i.location_message()).collect()
        };
        info!(ready = report.passed, score = report.score, "review readiness evaluated");
        Ok(ReviewReadiness {
            ready: report.passed,
            quality_passed: report.passed,
            quality_report: Some(report),
            failure_reasons,
        })
    }

    /// Every worktree whose directory name is a valid SPEC id.
    pub async fn list_spec_worktrees(&self, cancel: &CancellationToken) -> Result<Vec<WorktreeEntry>> {
        let entries = self.list(cancel).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.basename().is_some_and(is_valid_spec_id))
            .collect())
    }

    async fn find_worktree(&self, cancel: &CancellationToken, spec_id: &str) -> Result<WorktreeEntry> {
        self.list(cancel)
            .await?
            .into_iter()
            .find(|entry| entry.basename() == Some(spec_id))
            .ok_or_else(|| FlowError::NotInWorktree(format!("no worktree for {spec_id}")))
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<WorktreeEntry>> {
        match self.worktrees.list(cancel).await {
            Ok(entries) => Ok(entries),
            Err(_) if cancel.is_cancelled() => Err(FlowError::cancelled("worktree listing")),
            Err(err) => Err(FlowError::WorktreeList(err)),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
