use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::score::credit;
use crate::core::types::{Issue, Pillar, PrincipleResult, Severity};
use crate::io::diagnostics::{Diagnostic, SOURCE_TYPECHECK};
use crate::quality::{Evidence, Validator};

/// Type-check cleanliness, absence of general errors, and coverage.
pub struct TestedValidator {
    coverage_target: Option<f64>,
    current_coverage: f64,
}

impl TestedValidator {
    pub fn new(coverage_target: Option<f64>, current_coverage: f64) -> Self {
        Self {
            coverage_target,
            current_coverage,
        }
    }

    /// `1.0` when there is no target or it is met, `current / target` otherwise.
    /// A coverage figure that is not a finite number earns nothing.
    fn coverage_credit(&self) -> f64 {
        match self.coverage_target {
            Some(target) if target > 0.0 && !self.current_coverage.is_finite() => 0.0,
            Some(target) if target > 0.0 && self.current_coverage < target => {
                (self.current_coverage / target).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }
}

#[async_trait]
impl Validator for TestedValidator {
    fn name(&self) -> &str {
        Pillar::Tested.as_str()
    }

    async fn validate(&self, cancel: &CancellationToken, evidence: &Evidence) -> Result<PrincipleResult> {
        let diagnostics = evidence.diagnostics(cancel).await?;
        let typecheck: Vec<&Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.is_from(SOURCE_TYPECHECK))
            .collect();
        let general_errors: Vec<&Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.is_general() && d.severity == Severity::Error)
            .collect();

        let mut issues: Vec<Issue> = typecheck
            .iter()
            .chain(general_errors.iter())
            .map(|d| Issue {
                file: d.file.clone(),
                line: d.line,
                severity: Severity::Error,
                message: d.message.clone(),
                rule: d.rule(),
            })
            .collect();

        let coverage_met = self.coverage_credit() >= 1.0;
        if let (false, Some(target)) = (coverage_met, self.coverage_target) {
            issues.push(Issue::general(
                Severity::Error,
                "coverage",
                format!(
                    "test coverage {}% is below target {}%",
                    self.current_coverage, target
                ),
            ));
        }

        Ok(PrincipleResult::from_checks(
            self.name(),
            &[
                credit(typecheck.is_empty()),
                credit(general_errors.is_empty()),
                self.coverage_credit(),
            ],
            &[typecheck.is_empty(), general_errors.is_empty(), coverage_met],
            issues,
        ))
    }
}
