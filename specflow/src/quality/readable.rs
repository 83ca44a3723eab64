use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::score::penalty;
use crate::core::types::{Issue, Pillar, PrincipleResult};
use crate::io::diagnostics::SOURCE_LINT;
use crate::quality::{Evidence, Validator};

const LINT_PENALTY: f64 = 0.1;

/// Linter cleanliness.
pub struct ReadableValidator;

#[async_trait]
impl Validator for ReadableValidator {
    fn name(&self) -> &str {
        Pillar::Readable.as_str()
    }

    async fn validate(&self, cancel: &CancellationToken, evidence: &Evidence) -> Result<PrincipleResult> {
        let issues: Vec<Issue> = evidence
            .diagnostics(cancel)
            .await?
            .iter()
            .filter(|d| d.is_from(SOURCE_LINT))
            .map(|d| Issue {
                rule: d.rule(),
                file: d.file.clone(),
                line: d.line,
                severity: d.severity,
                message: d.message.clone(),
            })
            .collect();
        let count = issues.len();
        Ok(PrincipleResult::from_checks(
            self.name(),
            &[penalty(count, LINT_PENALTY)],
            &[count == 0],
            issues,
        ))
    }
}
