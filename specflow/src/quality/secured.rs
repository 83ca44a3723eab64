use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::score::penalty;
use crate::core::types::{Issue, Pillar, PrincipleResult, Severity};
use crate::io::diagnostics::SOURCE_SECURITY;
use crate::quality::{Evidence, Validator};

const FINDING_PENALTY: f64 = 0.2;

/// Security scanner findings. Every finding is an error regardless of the
/// severity the scanner assigned.
pub struct SecuredValidator;

#[async_trait]
impl Validator for SecuredValidator {
    fn name(&self) -> &str {
        Pillar::Secured.as_str()
    }

    async fn validate(&self, cancel: &CancellationToken, evidence: &Evidence) -> Result<PrincipleResult> {
        let issues: Vec<Issue> = evidence
            .diagnostics(cancel)
            .await?
            .iter()
            .filter(|d| d.is_from(SOURCE_SECURITY))
            .map(|d| Issue {
                rule: d.rule(),
                file: d.file.clone(),
                line: d.line,
                severity: Severity::Error,
                message: d.message.clone(),
            })
            .collect();
        let count = issues.len();
        Ok(PrincipleResult::from_checks(
            self.name(),
            &[penalty(count, FINDING_PENALTY)],
            &[count == 0],
            issues,
        ))
    }
}
