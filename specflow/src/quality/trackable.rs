use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::conventional::is_conventional_commit;
use crate::core::score::credit;
use crate::core::types::{Issue, Pillar, PrincipleResult, Severity};
use crate::quality::{Evidence, Validator};

/// Commit hygiene and operational traceability.
pub struct TrackableValidator {
    structured_logging: bool,
    diagnostic_history: bool,
}

impl TrackableValidator {
    pub fn new(structured_logging: bool, diagnostic_history: bool) -> Self {
        Self {
            structured_logging,
            diagnostic_history,
        }
    }
}

#[async_trait]
impl Validator for TrackableValidator {
    fn name(&self) -> &str {
        Pillar::Trackable.as_str()
    }

    async fn validate(&self, cancel: &CancellationToken, evidence: &Evidence) -> Result<PrincipleResult> {
        let message = evidence.last_commit_message(cancel).await?;
        let conventional = is_conventional_commit(&message);

        let mut issues = Vec::new();
        if !conventional {
            let subject = message.lines().next().unwrap_or_default();
            issues.push(Issue::general(
                Severity::Error,
                "conventional-commits",
                format!("last commit is not a conventional commit: '{subject}'"),
            ));
        }
        if !self.structured_logging {
            issues.push(Issue::general(
                Severity::Error,
                "structured-logging",
                "structured logging is not configured",
            ));
        }
        if !self.diagnostic_history {
            issues.push(Issue::general(
                Severity::Error,
                "diagnostic-history",
                "diagnostic history is not tracked",
            ));
        }

        Ok(PrincipleResult::from_checks(
            self.name(),
            &[
                credit(conventional),
                credit(self.structured_logging),
                credit(self.diagnostic_history),
            ],
            &[conventional, self.structured_logging, self.diagnostic_history],
            issues,
        ))
    }
}
