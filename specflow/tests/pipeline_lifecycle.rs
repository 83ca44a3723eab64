//! End-to-end pipeline scenarios over scripted collaborators.
//!
//! Each test wires a real quality [`Gate`] (static diagnostics and commit
//! history), the orchestrator, and the merge/close components against a
//! scripted code host, then drives a SPEC from worktree detection to landing.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use specflow::FlowError;
use specflow::core::types::{CiOverall, Phase, PhaseStatus, Severity};
use specflow::io::config::{FlowConfig, load_config, write_config};
use specflow::io::diagnostics::{SOURCE_LINT, SOURCE_SECURITY};
use specflow::issue::IssueCloser;
use specflow::land::Lander;
use specflow::merge::{MergeOptions, Merger};
use specflow::orchestrator::{MergeGate, Orchestrator, merge_gate};
use specflow::quality::{Gate, ProjectSignals, QualityGate};
use specflow::retry::RetryPolicy;
use specflow::test_support::{
    RecordingSleeper, ScriptedExecutor, ScriptedHost, StaticCommits, StaticDiagnostics,
    TempWorktree, checks, diagnostic, open_pr,
};
use tokio_util::sync::CancellationToken;

const SPEC_ID: &str = "SPEC-ISSUE-77";

fn gate(config: &FlowConfig, signals: &ProjectSignals, diagnostics: StaticDiagnostics) -> Arc<dyn QualityGate> {
    Arc::new(
        Gate::from_config(
            &config.quality,
            signals,
            Arc::new(diagnostics),
            Arc::new(StaticCommits::new("feat(pipeline): land SPEC-ISSUE-77")),
        )
        .expect("gate"),
    )
}

fn orchestrator(fixture: &TempWorktree, config: &FlowConfig, gate: Arc<dyn QualityGate>) -> Orchestrator {
    Orchestrator::builder()
        .worktrees(Arc::new(fixture.lister()))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .gate(gate)
        .workflow_config(&config.workflow)
        .build()
        .expect("orchestrator")
}

fn lander(host: &Arc<ScriptedHost>, gate: Arc<dyn QualityGate>, config: &FlowConfig) -> Lander {
    let closer = IssueCloser::new(host.clone())
        .with_policy(RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::from_config(&config.issue)
        })
        .with_sleeper(Arc::new(RecordingSleeper::default()));
    Lander::new(Merger::new(host.clone(), gate), closer)
}

/// Detect → Plan/Run/Sync → merge gate → merge → close.
#[tokio::test]
async fn clean_spec_lands_and_closes_issue() {
    specflow::logging::try_init();
    let cancel = CancellationToken::new();
    let fixture = TempWorktree::new(SPEC_ID);
    let config = FlowConfig::default();
    let gate = gate(&config, &ProjectSignals::default(), StaticDiagnostics::new(Vec::new()));
    let orchestrator = orchestrator(&fixture, &config, gate.clone());
    let src = fixture.worktree().join("src");
    fs::create_dir_all(&src).expect("mkdir");

    let ctx = orchestrator
        .detect_worktree_context(&cancel, &src)
        .await
        .expect("context");
    assert_eq!(ctx.issue_number, 77);

    let result = orchestrator
        .execute_workflow(&cancel, &ctx.spec_id)
        .await
        .expect("workflow");
    assert!(result.all_completed());
    assert_eq!(merge_gate(&result), MergeGate::Allowed);

    let readiness = orchestrator
        .prepare_for_review(&cancel, &ctx.spec_id)
        .await
        .expect("readiness");
    assert!(readiness.ready);

    let host = Arc::new(ScriptedHost::new(open_pr(301)).with_checks(Ok(checks(CiOverall::Pass))));
    let opts = MergeOptions::for_worktree(&ctx, &config.merge).with_auto_merge(true);
    let landed = lander(&host, gate, &config)
        .land(&cancel, &ctx, 301, &opts)
        .await
        .expect("land");

    assert_eq!(landed.merge.pr_number, 301);
    assert!(landed.close.comment_posted);
    assert!(landed.close.label_added);
    assert!(landed.close.issue_closed);
    let counts = host.counts();
    assert_eq!(counts.pr_view, 1);
    assert_eq!(counts.pr_checks, 1);
    assert_eq!(counts.pr_merge, 1);
    assert_eq!(host.comments()[0].0, 77);
}

/// Coverage below the configured target fails the tested pillar, which blocks
/// the merge gate, review readiness and the merge itself.
#[tokio::test]
async fn coverage_shortfall_blocks_the_pipeline() {
    specflow::logging::try_init();
    let cancel = CancellationToken::new();
    let fixture = TempWorktree::new(SPEC_ID);
    let config_path = fixture.root().join(".specflow/config.toml");
    let mut config = FlowConfig::default();
    config.quality.coverage_target = Some(85.0);
    write_config(&config_path, &config).expect("write config");
    let config = load_config(&config_path).expect("load config");

    let signals = ProjectSignals {
        coverage: 70.0,
        ..ProjectSignals::default()
    };
    let gate = gate(&config, &signals, StaticDiagnostics::new(Vec::new()));
    let orchestrator = orchestrator(&fixture, &config, gate.clone());

    let result = orchestrator
        .execute_workflow(&cancel, SPEC_ID)
        .await
        .expect("workflow");
    let report = result.quality_report.as_ref().expect("report");
    assert!(!report.passed);
    let tested = report.principle("tested").expect("tested");
    assert_eq!(tested.issues.len(), 1);
    assert!(tested.issues[0]
        .message
        .contains("test coverage 70% is below target 85%"));
    assert!(matches!(merge_gate(&result), MergeGate::Blocked(_)));

    let readiness = orchestrator
        .prepare_for_review(&cancel, SPEC_ID)
        .await
        .expect("readiness");
    assert!(!readiness.ready);
    assert_eq!(readiness.failure_reasons.len(), 1);

    let ctx = orchestrator
        .detect_worktree_context(&cancel, &fixture.worktree())
        .await
        .expect("context");
    let host = Arc::new(ScriptedHost::new(open_pr(302)).with_checks(Ok(checks(CiOverall::Pass))));
    let opts = MergeOptions::for_worktree(&ctx, &config.merge).with_auto_merge(true);
    let err = lander(&host, gate, &config)
        .land(&cancel, &ctx, 302, &opts)
        .await
        .expect_err("blocked");
    let FlowError::MergeBlocked { reasons, .. } = err else {
        panic!("expected MergeBlocked");
    };
    assert!(reasons.contains(&"quality gate has not passed".to_string()));
    assert_eq!(host.counts().pr_merge, 0);
    assert_eq!(host.counts().issue_close, 0);
}

/// One gate serves two SPECs; each verdict comes from that SPEC's own
/// worktree, so a finding in one never blocks or clears the other.
#[tokio::test]
async fn each_spec_is_judged_on_its_own_worktree() {
    let cancel = CancellationToken::new();
    let fixture = TempWorktree::new("SPEC-ISSUE-1").with_spec("SPEC-ISSUE-2");
    let dirty = fixture.worktree_for("SPEC-ISSUE-1");
    let clean = fixture.worktree_for("SPEC-ISSUE-2");
    let config = FlowConfig::default();
    let diagnostics = StaticDiagnostics::new(Vec::new()).with_dir(
        &dirty,
        vec![diagnostic(SOURCE_SECURITY, Severity::Error, "hardcoded token")],
    );
    let dirs = diagnostics.dirs();
    let gate = gate(&config, &ProjectSignals::default(), diagnostics);
    let orchestrator = orchestrator(&fixture, &config, gate.clone());

    let passed = orchestrator
        .execute_workflow(&cancel, "SPEC-ISSUE-2")
        .await
        .expect("workflow");
    assert_eq!(merge_gate(&passed), MergeGate::Allowed);

    let failed = orchestrator
        .execute_workflow(&cancel, "SPEC-ISSUE-1")
        .await
        .expect("workflow");
    assert!(matches!(merge_gate(&failed), MergeGate::Blocked(_)));
    assert_eq!(dirs.get(), vec![clean.clone(), dirty.clone()]);

    let ctx = orchestrator
        .detect_worktree_context(&cancel, &dirty)
        .await
        .expect("context");
    let host = Arc::new(ScriptedHost::new(open_pr(303)).with_checks(Ok(checks(CiOverall::Pass))));
    let opts = MergeOptions::for_worktree(&ctx, &config.merge).with_auto_merge(true);
    let err = lander(&host, gate, &config)
        .land(&cancel, &ctx, 303, &opts)
        .await
        .expect_err("blocked");
    assert!(matches!(err, FlowError::MergeBlocked { .. }));
    assert_eq!(dirs.get().last(), Some(&dirty));
    assert_eq!(host.counts().pr_merge, 0);
}

/// A Run failure skips Sync and never reaches the gate; lint findings are
/// irrelevant because quality is never evaluated.
#[tokio::test]
async fn run_failure_short_circuits_before_quality() {
    let cancel = CancellationToken::new();
    let fixture = TempWorktree::new(SPEC_ID);
    let config = FlowConfig::default();
    let diagnostics = StaticDiagnostics::new(vec![diagnostic(SOURCE_LINT, Severity::Error, "unused")]);
    let calls = diagnostics.calls();
    let orchestrator = Orchestrator::builder()
        .worktrees(Arc::new(fixture.lister()))
        .executor(Arc::new(ScriptedExecutor::failing_at(Phase::Run, "agent exited 1")))
        .gate(gate(&config, &ProjectSignals::default(), diagnostics))
        .build()
        .expect("orchestrator");

    let err = orchestrator
        .execute_workflow(&cancel, SPEC_ID)
        .await
        .expect_err("run fails");
    assert_eq!(err.failed_phase(), Some(Phase::Run));
    let partial = err.workflow_result().expect("partial");
    assert_eq!(partial.plan_status, PhaseStatus::Completed);
    assert_eq!(partial.sync_status, PhaseStatus::Skipped);
    assert!(partial.quality_report.is_none());
    assert_eq!(calls.get(), 0);
}

#[tokio::test]
async fn missing_spec_document_is_reported() {
    let fixture = TempWorktree::without_spec_document(SPEC_ID);
    fs::create_dir_all(fixture.worktree().join("docs")).expect("mkdir");
    let config = FlowConfig::default();
    let orchestrator = orchestrator(
        &fixture,
        &config,
        gate(&config, &ProjectSignals::default(), StaticDiagnostics::new(Vec::new())),
    );
    let err = orchestrator
        .detect_worktree_context(&CancellationToken::new(), &fixture.worktree().join("docs"))
        .await
        .expect_err("no spec doc");
    assert!(matches!(err, FlowError::SpecDocumentMissing(_)));
}
