//! Diagnostics feeding the quality validators.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::core::types::Severity;
use crate::io::config::DiagnosticsConfig;
use crate::io::process::{CommandLimits, run_checked};

/// `source` of type-checker diagnostics.
pub const SOURCE_TYPECHECK: &str = "typecheck";
/// `source` of linter diagnostics.
pub const SOURCE_LINT: &str = "lint";
/// `source` of security scanner diagnostics.
pub const SOURCE_SECURITY: &str = "security";

/// One diagnostic reported by a language-server-like source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub severity: Severity,
    /// `typecheck`, `lint`, `security`; anything else is a general diagnostic.
    pub source: String,
    #[serde(default)]
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn is_from(&self, source: &str) -> bool {
        self.source == source
    }

    /// Neither type-checker, linter nor security scanner.
    pub fn is_general(&self) -> bool {
        ![SOURCE_TYPECHECK, SOURCE_LINT, SOURCE_SECURITY].contains(&self.source.as_str())
    }

    /// Rule identifier used on derived issues (`source/code` or `source`).
    pub fn rule(&self) -> String {
        if self.code.is_empty() {
            self.source.clone()
        } else {
            format!("{}/{}", self.source, self.code)
        }
    }
}

#[async_trait]
pub trait DiagnosticsSource: Send + Sync {
    /// Diagnostics for the tree checked out at `work_dir`.
    async fn collect_diagnostics(
        &self,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<Vec<Diagnostic>>;
}

/// Diagnostics source that runs a command in the worktree and reads a JSON
/// array of [`Diagnostic`] values from its stdout.
#[derive(Debug, Clone)]
pub struct CommandDiagnostics {
    command: Vec<String>,
    limits: CommandLimits,
}

impl CommandDiagnostics {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self {
            command: config.command.clone(),
            limits: CommandLimits {
                timeout: Duration::from_secs(config.timeout_secs),
                ..CommandLimits::default()
            },
        }
    }
}

#[async_trait]
impl DiagnosticsSource for CommandDiagnostics {
    #[instrument(skip_all, fields(work_dir = %work_dir.display()))]
    async fn collect_diagnostics(
        &self,
        cancel: &CancellationToken,
        work_dir: &Path,
    ) -> Result<Vec<Diagnostic>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("diagnostics command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(work_dir);
        let output = run_checked(cmd, program, self.limits, cancel).await?;
        let diagnostics = parse_diagnostics(&output.stdout_text())?;
        debug!(count = diagnostics.len(), "collected diagnostics");
        Ok(diagnostics)
    }
}

fn parse_diagnostics(json: &str) -> Result<Vec<Diagnostic>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).context("parse diagnostics json")
}
