//! Workflow progress observers.

use crate::core::types::{Phase, Report};

/// Receives workflow progress. Every method defaults to a no-op.
pub trait WorkflowReporter: Send + Sync {
    fn phase_started(&self, _spec_id: &str, _phase: Phase) {}

    fn phase_completed(&self, _spec_id: &str, _phase: Phase) {}

    fn phase_failed(&self, _spec_id: &str, _phase: Phase, _err: &anyhow::Error) {}

    fn quality_evaluated(&self, _spec_id: &str, _report: &Report) {}
}

/// Reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl WorkflowReporter for NullReporter {}

/// Reporter that emits `info`/`warn` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl WorkflowReporter for TracingReporter {
    fn phase_started(&self, spec_id: &str, phase: Phase) {
        tracing::info!(spec_id, phase = %phase, "phase started");
    }

    fn phase_completed(&self, spec_id: &str, phase: Phase) {
        tracing::info!(spec_id, phase = %phase, "phase completed");
    }

    fn phase_failed(&self, spec_id: &str, phase: Phase, err: &anyhow::Error) {
        tracing::warn!(spec_id, phase = %phase, err = %err, "phase failed");
    }

    fn quality_evaluated(&self, spec_id: &str, report: &Report) {
        tracing::info!(
            spec_id,
            passed = report.passed,
            score = report.score,
            "quality evaluated"
        );
    }
}
