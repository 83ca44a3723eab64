use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::score::{credit, penalty};
use crate::core::types::{Issue, Pillar, PrincipleResult, Severity};
use crate::io::diagnostics::SOURCE_SECURITY;
use crate::quality::{Evidence, Validator};

const EXCESS_WARNING_PENALTY: f64 = 0.05;

/// Warning volume, documentation completeness and complexity.
pub struct UnderstandableValidator {
    warning_threshold: usize,
    docs_complete: bool,
    complexity_acceptable: bool,
}

impl UnderstandableValidator {
    pub fn new(warning_threshold: usize, docs_complete: bool, complexity_acceptable: bool) -> Self {
        Self {
            warning_threshold,
            docs_complete,
            complexity_acceptable,
        }
    }
}

#[async_trait]
impl Validator for UnderstandableValidator {
    fn name(&self) -> &str {
        Pillar::Understandable.as_str()
    }

    async fn validate(&self, cancel: &CancellationToken, evidence: &Evidence) -> Result<PrincipleResult> {
        // Security warnings are the secured pillar's business.
        let warnings = evidence
            .diagnostics(cancel)
            .await?
            .iter()
            .filter(|d| d.severity == Severity::Warning && !d.is_from(SOURCE_SECURITY))
            .count();

        let within_threshold = warnings <= self.warning_threshold;
        let warning_credit = if within_threshold {
            1.0
        } else {
            penalty(warnings - self.warning_threshold, EXCESS_WARNING_PENALTY)
        };

        let mut issues = Vec::new();
        if !within_threshold {
            issues.push(Issue::general(
                Severity::Error,
                "warning-threshold",
                format!(
                    "{warnings} warnings exceed the threshold of {}",
                    self.warning_threshold
                ),
            ));
        }
        if !self.docs_complete {
            issues.push(Issue::general(
                Severity::Error,
                "documentation",
                "documentation is incomplete",
            ));
        }
        if !self.complexity_acceptable {
            issues.push(Issue::general(
                Severity::Error,
                "complexity",
                "code complexity exceeds the acceptable limit",
            ));
        }

        Ok(PrincipleResult::from_checks(
            self.name(),
            &[
                warning_credit,
                credit(self.docs_complete),
                credit(self.complexity_acceptable),
            ],
            &[within_threshold, self.docs_complete, self.complexity_acceptable],
            issues,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::diagnostics::Diagnostic;
    use crate::test_support::{diagnostic, evidence};

    fn warnings(count: usize, source: &str) -> Vec<Diagnostic> {
        (0..count)
            .map(|i| diagnostic(source, Severity::Warning, &format!("warning {i}")))
            .collect()
    }

    async fn run(diagnostics: Vec<Diagnostic>, docs: bool, complexity: bool) -> PrincipleResult {
        UnderstandableValidator::new(10, docs, complexity)
            .validate(&CancellationToken::new(), &evidence(diagnostics, "feat: x"))
            .await
            .expect("validate")
    }

    #[tokio::test]
    async fn warnings_up_to_threshold_are_tolerated() {
        let result = run(warnings(10, "lint"), true, true).await;
        assert!(result.passed);
        assert_eq!(result.score, 1.0);
    }

    #[tokio::test]
    async fn excess_warnings_are_penalized() {
        let result = run(warnings(14, "lint"), true, true).await;
        assert!(!result.passed);
        // (0.8 + 1 + 1) / 3
        assert_eq!(result.score, 0.933);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message.contains("14 warnings"));
    }

    #[tokio::test]
    async fn security_warnings_do_not_count() {
        let result = run(warnings(20, SOURCE_SECURITY), true, true).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn missing_docs_and_complexity_fail_with_issues() {
        let result = run(Vec::new(), false, false).await;
        assert!(!result.passed);
        assert_eq!(result.score, 0.333);
        let rules: Vec<&str> = result.issues.iter().map(|i| i.rule.as_str()).collect();
        assert_eq!(rules, vec!["documentation", "complexity"]);
    }
}
