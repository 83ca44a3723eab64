//! Test-only collaborators and fixtures.
//!
//! Every double is deterministic and records how it was called so tests can
//! assert on call counts (e.g. "the PR was fetched exactly once").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::types::{CiOverall, Phase, Report, Severity};
use crate::error::FlowError;
use crate::io::diagnostics::{Diagnostic, DiagnosticsSource};
use crate::io::executor::PhaseExecutor;
use crate::io::git::CommitHistory;
use crate::io::host::{CheckRun, CheckStatus, CodeHost, MergeMethod, PrDetails};
use crate::io::worktree::{WorktreeEntry, WorktreeLister};
use crate::quality::{Evidence, QualityGate};
use crate::reporter::WorkflowReporter;
use crate::retry::Sleeper;

/// Shared call counter handed out before a double is moved into an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Shared log of the directories a double was asked about.
#[derive(Debug, Clone, Default)]
pub struct DirLog(Arc<Mutex<Vec<PathBuf>>>);

impl DirLog {
    pub fn get(&self) -> Vec<PathBuf> {
        self.0.lock().expect("dir log").clone()
    }

    fn push(&self, dir: &Path) {
        self.0.lock().expect("dir log").push(dir.to_path_buf());
    }
}

/// Diagnostic at `src/lib.rs:1` with no code.
pub fn diagnostic(source: &str, severity: Severity, message: &str) -> Diagnostic {
    Diagnostic {
        file: "src/lib.rs".to_string(),
        line: 1,
        severity,
        source: source.to_string(),
        code: String::new(),
        message: message.to_string(),
    }
}

/// Open, mergeable PR.
pub fn open_pr(number: u64) -> PrDetails {
    PrDetails {
        number,
        state: "OPEN".to_string(),
        mergeable: "MERGEABLE".to_string(),
        title: format!("SPEC-ISSUE-{number}"),
    }
}

/// `build` passes; `test` carries `overall`.
pub fn checks(overall: CiOverall) -> CheckStatus {
    CheckStatus::from_checks(vec![
        CheckRun {
            name: "build".to_string(),
            status: CiOverall::Pass,
        },
        CheckRun {
            name: "test".to_string(),
            status: overall,
        },
    ])
}

/// Diagnostics keyed by worktree; directories without an entry get the
/// default outcome.
pub struct StaticDiagnostics {
    outcome: std::result::Result<Vec<Diagnostic>, String>,
    per_dir: HashMap<PathBuf, Vec<Diagnostic>>,
    calls: CallCounter,
    dirs: DirLog,
}

impl StaticDiagnostics {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self::with_outcome(Ok(diagnostics))
    }

    /// Source that always fails to respond.
    pub fn unreachable(message: &str) -> Self {
        Self::with_outcome(Err(message.to_string()))
    }

    fn with_outcome(outcome: std::result::Result<Vec<Diagnostic>, String>) -> Self {
        Self {
            outcome,
            per_dir: HashMap::new(),
            calls: CallCounter::default(),
            dirs: DirLog::default(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>, diagnostics: Vec<Diagnostic>) -> Self {
        self.per_dir.insert(dir.into(), diagnostics);
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    pub fn dirs(&self) -> DirLog {
        self.dirs.clone()
    }
}

#[async_trait]
impl DiagnosticsSource for StaticDiagnostics {
    async fn collect_diagnostics(
        &self,
        _cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<Vec<Diagnostic>> {
        self.calls.bump();
        self.dirs.push(work_dir);
        if let Some(diagnostics) = self.per_dir.get(work_dir) {
            return Ok(diagnostics.clone());
        }
        self.outcome.clone().map_err(|message| anyhow!(message))
    }
}

pub struct StaticCommits {
    message: String,
}

impl StaticCommits {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl CommitHistory for StaticCommits {
    async fn last_commit_message(&self, _cancel: &CancellationToken, _work_dir: &Path) -> Result<String> {
        Ok(self.message.clone())
    }
}

/// Gate evidence for `/repo` backed by fixed diagnostics and commit message.
pub fn evidence(diagnostics: Vec<Diagnostic>, commit: &str) -> Evidence {
    Evidence::new(
        "/repo",
        Arc::new(StaticDiagnostics::new(diagnostics)),
        Arc::new(StaticCommits::new(commit)),
    )
}

pub struct StaticWorktrees {
    root: PathBuf,
    outcome: std::result::Result<Vec<WorktreeEntry>, String>,
}

impl StaticWorktrees {
    /// `entries` are `(path, branch)` pairs.
    pub fn new(root: impl Into<PathBuf>, entries: Vec<(&str, &str)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(path, branch)| WorktreeEntry {
                path: PathBuf::from(path),
                branch: branch.to_string(),
                head: "0".repeat(40),
            })
            .collect();
        Self::from_entries(root, entries)
    }

    pub fn from_entries(root: impl Into<PathBuf>, entries: Vec<WorktreeEntry>) -> Self {
        Self {
            root: root.into(),
            outcome: Ok(entries),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            root: PathBuf::from("/repo"),
            outcome: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl WorktreeLister for StaticWorktrees {
    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<WorktreeEntry>> {
        self.outcome.clone().map_err(|message| anyhow!(message))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

enum PhaseScript {
    Succeed,
    FailAt(Phase, String),
    CancelAt(Phase, CancellationToken),
}

/// Phase executor that records calls and fails or cancels on demand.
pub struct ScriptedExecutor {
    script: PhaseScript,
    calls: Mutex<Vec<(Phase, PathBuf)>>,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self::with_script(PhaseScript::Succeed)
    }

    pub fn failing_at(phase: Phase, message: &str) -> Self {
        Self::with_script(PhaseScript::FailAt(phase, message.to_string()))
    }

    /// Cancels `cancel` when `phase` starts, then never finishes.
    pub fn cancelling_at(phase: Phase, cancel: CancellationToken) -> Self {
        Self::with_script(PhaseScript::CancelAt(phase, cancel))
    }

    fn with_script(script: PhaseScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Phase> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(phase, _)| *phase)
            .collect()
    }

    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, dir)| dir.clone())
            .collect()
    }

    async fn step(&self, phase: Phase, work_dir: &Path) -> Result<()> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((phase, work_dir.to_path_buf()));
        match &self.script {
            PhaseScript::FailAt(at, message) if *at == phase => Err(anyhow!(message.clone())),
            PhaseScript::CancelAt(at, cancel) if *at == phase => {
                cancel.cancel();
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedExecutor {
    async fn execute_plan(
        &self,
        _cancel: &CancellationToken,
        _spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.step(Phase::Plan, work_dir).await
    }

    async fn execute_run(
        &self,
        _cancel: &CancellationToken,
        _spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.step(Phase::Run, work_dir).await
    }

    async fn execute_sync(
        &self,
        _cancel: &CancellationToken,
        _spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.step(Phase::Sync, work_dir).await
    }
}

/// Quality gate returning a fixed report or a fixed invocation error.
pub struct ScriptedGate {
    outcome: std::result::Result<Report, String>,
    calls: CallCounter,
    dirs: DirLog,
}

impl ScriptedGate {
    pub fn report(report: Report) -> Self {
        Self {
            outcome: Ok(report),
            calls: CallCounter::default(),
            dirs: DirLog::default(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: CallCounter::default(),
            dirs: DirLog::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Worktrees the gate was asked to judge, in call order.
    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.dirs.get()
    }
}

#[async_trait]
impl QualityGate for ScriptedGate {
    async fn validate(&self, _cancel: &CancellationToken, work_dir: &Path) -> crate::Result<Report> {
        self.calls.bump();
        self.dirs.push(work_dir);
        self.outcome.clone().map_err(|message| FlowError::Validator {
            validator: "scripted".to_string(),
            source: anyhow!(message),
        })
    }
}

/// Reporter collecting events as short strings (`"started plan"`).
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    fn push(&self, event: String) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl WorkflowReporter for RecordingReporter {
    fn phase_started(&self, _spec_id: &str, phase: Phase) {
        self.push(format!("started {phase}"));
    }

    fn phase_completed(&self, _spec_id: &str, phase: Phase) {
        self.push(format!("completed {phase}"));
    }

    fn phase_failed(&self, _spec_id: &str, phase: Phase, _err: &anyhow::Error) {
        self.push(format!("failed {phase}"));
    }

    fn quality_evaluated(&self, _spec_id: &str, report: &Report) {
        self.push(format!("quality {}", report.passed));
    }
}

/// Sleeper that records requested delays without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    cancel_on_sleep: Option<CancellationToken>,
}

impl RecordingSleeper {
    /// Cancels `cancel` on the first sleep, as if the user interrupted mid-backoff.
    pub fn cancelling(cancel: CancellationToken) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            cancel_on_sleep: Some(cancel),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("delays lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, cancel: &CancellationToken, delay: Duration) -> bool {
        self.delays.lock().expect("delays lock").push(delay);
        if let Some(token) = &self.cancel_on_sleep {
            token.cancel();
        }
        !cancel.is_cancelled()
    }
}

/// Per-operation call counts of a [`ScriptedHost`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCounts {
    pub pr_view: usize,
    pub pr_checks: usize,
    pub pr_merge: usize,
    pub issue_comment: usize,
    pub issue_add_label: usize,
    pub issue_close: usize,
}

#[derive(Default)]
struct HostLog {
    counts: HostCounts,
    merges: Vec<(u64, MergeMethod, bool)>,
    comments: Vec<(u64, String)>,
    labels: Vec<(u64, String)>,
}

/// Code host with scripted responses.
///
/// `failing_*(n)` makes the first `n` calls of that operation fail;
/// `usize::MAX` makes every call fail.
pub struct ScriptedHost {
    pr: std::result::Result<PrDetails, String>,
    checks: std::result::Result<CheckStatus, String>,
    merge_error: Option<String>,
    comment_failures: usize,
    label_failures: usize,
    close_failures: usize,
    log: Mutex<HostLog>,
}

impl ScriptedHost {
    pub fn new(pr: PrDetails) -> Self {
        Self {
            pr: Ok(pr),
            checks: Ok(CheckStatus::from_checks(Vec::new())),
            merge_error: None,
            comment_failures: 0,
            label_failures: 0,
            close_failures: 0,
            log: Mutex::new(HostLog::default()),
        }
    }

    pub fn with_checks(mut self, checks: std::result::Result<CheckStatus, String>) -> Self {
        self.checks = checks;
        self
    }

    pub fn failing_pr_view(mut self, message: &str) -> Self {
        self.pr = Err(message.to_string());
        self
    }

    pub fn failing_merge(mut self, message: &str) -> Self {
        self.merge_error = Some(message.to_string());
        self
    }

    pub fn failing_comment(mut self, times: usize) -> Self {
        self.comment_failures = times;
        self
    }

    pub fn failing_label(mut self, times: usize) -> Self {
        self.label_failures = times;
        self
    }

    pub fn failing_close(mut self, times: usize) -> Self {
        self.close_failures = times;
        self
    }

    pub fn counts(&self) -> HostCounts {
        self.log().counts
    }

    pub fn merges(&self) -> Vec<(u64, MergeMethod, bool)> {
        self.log().merges.clone()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.log().comments.clone()
    }

    pub fn labels(&self) -> Vec<(u64, String)> {
        self.log().labels.clone()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, HostLog> {
        self.log.lock().expect("host log lock")
    }
}

#[async_trait]
impl CodeHost for ScriptedHost {
    async fn pr_view(&self, _cancel: &CancellationToken, _number: u64) -> Result<PrDetails> {
        self.log().counts.pr_view += 1;
        self.pr.clone().map_err(|message| anyhow!(message))
    }

    async fn pr_checks(&self, _cancel: &CancellationToken, _number: u64) -> Result<CheckStatus> {
        self.log().counts.pr_checks += 1;
        self.checks.clone().map_err(|message| anyhow!(message))
    }

    async fn pr_merge(
        &self,
        _cancel: &CancellationToken,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> Result<()> {
        let mut log = self.log();
        log.counts.pr_merge += 1;
        if let Some(message) = &self.merge_error {
            return Err(anyhow!(message.clone()));
        }
        log.merges.push((number, method, delete_branch));
        Ok(())
    }

    async fn issue_comment(&self, _cancel: &CancellationToken, issue: u64, body: &str) -> Result<()> {
        let mut log = self.log();
        log.counts.issue_comment += 1;
        if log.counts.issue_comment <= self.comment_failures {
            return Err(anyhow!("comment on #{issue}: HTTP 502"));
        }
        log.comments.push((issue, body.to_string()));
        Ok(())
    }

    async fn issue_add_label(
        &self,
        _cancel: &CancellationToken,
        issue: u64,
        label: &str,
    ) -> Result<()> {
        let mut log = self.log();
        log.counts.issue_add_label += 1;
        if log.counts.issue_add_label <= self.label_failures {
            return Err(anyhow!("label '{label}' not found"));
        }
        log.labels.push((issue, label.to_string()));
        Ok(())
    }

    async fn issue_close(&self, _cancel: &CancellationToken, issue: u64) -> Result<()> {
        let mut log = self.log();
        log.counts.issue_close += 1;
        if log.counts.issue_close <= self.close_failures {
            return Err(anyhow!("close #{issue}: HTTP 503"));
        }
        Ok(())
    }
}

/// Temporary repository layout with SPEC worktrees.
///
/// ```text
/// <root>/                      (main worktree, branch `main`)
/// <root>/.worktrees/<SPEC-ID>/ (branch `feature/<SPEC-ID>`)
///     .specflow/specs/<SPEC-ID>/spec.md
/// ```
pub struct TempWorktree {
    dir: tempfile::TempDir,
    specs: Vec<String>,
}

impl TempWorktree {
    pub fn new(spec_id: &str) -> Self {
        let fixture = Self::without_spec_document(spec_id);
        write_spec_document(&fixture.worktree(), spec_id);
        fixture
    }

    pub fn without_spec_document(spec_id: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".worktrees").join(spec_id)).expect("create worktree");
        Self {
            dir,
            specs: vec![spec_id.to_string()],
        }
    }

    /// Add another SPEC worktree, with its document.
    pub fn with_spec(mut self, spec_id: &str) -> Self {
        let worktree = self.worktree_for(spec_id);
        std::fs::create_dir_all(&worktree).expect("create worktree");
        write_spec_document(&worktree, spec_id);
        self.specs.push(spec_id.to_string());
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Worktree of the first SPEC.
    pub fn worktree(&self) -> PathBuf {
        self.worktree_for(&self.specs[0])
    }

    pub fn worktree_for(&self, spec_id: &str) -> PathBuf {
        self.root().join(".worktrees").join(spec_id)
    }

    /// Lister reporting the main worktree and every SPEC worktree.
    pub fn lister(&self) -> StaticWorktrees {
        let main = WorktreeEntry {
            path: self.root().to_path_buf(),
            branch: "main".to_string(),
            head: "1".repeat(40),
        };
        let specs = self.specs.iter().map(|spec_id| WorktreeEntry {
            path: self.worktree_for(spec_id),
            branch: format!("feature/{spec_id}"),
            head: "2".repeat(40),
        });
        StaticWorktrees::from_entries(self.root(), std::iter::once(main).chain(specs).collect())
    }
}

fn write_spec_document(worktree: &Path, spec_id: &str) {
    let doc_dir = worktree.join(".specflow/specs").join(spec_id);
    std::fs::create_dir_all(&doc_dir).expect("create spec dir");
    std::fs::write(doc_dir.join("spec.md"), format!("# {spec_id}\n")).expect("write spec");
}
