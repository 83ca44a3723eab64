//! Pipeline configuration stored under `.specflow/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Pillar;
use crate::io::host::MergeMethod;

/// Default location of the config file, relative to the repository root.
pub const CONFIG_PATH: &str = ".specflow/config.toml";

/// Pipeline configuration (TOML).
///
/// Missing sections and fields fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    pub quality: QualityConfig,
    pub workflow: WorkflowConfig,
    pub merge: MergeConfig,
    pub issue: IssueConfig,
    pub phases: PhaseCommands,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Pillars to evaluate, in order.
    pub pillars: Vec<Pillar>,
    /// Coverage target in percent. `None` gives full coverage credit.
    pub coverage_target: Option<f64>,
    /// Warnings tolerated before the understandable pillar is penalized.
    pub warning_threshold: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            pillars: Pillar::ALL.to_vec(),
            coverage_target: None,
            warning_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directory (relative to a worktree) holding `<SPEC-ID>/spec.md`.
    pub spec_dir: PathBuf,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            spec_dir: PathBuf::from(".specflow/specs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MergeConfig {
    pub method: MergeMethod,
    pub delete_branch: bool,
    pub require_review: bool,
    pub require_checks: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            method: MergeMethod::Merge,
            delete_branch: true,
            require_review: true,
            require_checks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IssueConfig {
    /// Retries after the first attempt of each step.
    pub max_retries: u32,
    /// Delay before the first retry; doubles after every failed attempt.
    pub base_delay_ms: u64,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl IssueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Commands run by [`crate::io::executor::CommandPhaseExecutor`].
///
/// `{spec_id}` in any argument is replaced with the SPEC id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhaseCommands {
    pub plan: Vec<String>,
    pub run: Vec<String>,
    pub sync: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for PhaseCommands {
    fn default() -> Self {
        Self {
            plan: vec!["just".to_string(), "plan".to_string(), "{spec_id}".to_string()],
            run: vec!["just".to_string(), "run".to_string(), "{spec_id}".to_string()],
            sync: vec!["just".to_string(), "sync".to_string(), "{spec_id}".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

/// Command run by [`crate::io::diagnostics::CommandDiagnostics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Must print a JSON array of diagnostics on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            command: vec!["just".to_string(), "diagnostics".to_string()],
            timeout_secs: 5 * 60,
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quality.pillars.is_empty() {
            return Err(anyhow!("quality.pillars must not be empty"));
        }
        for (i, pillar) in self.quality.pillars.iter().enumerate() {
            if self.quality.pillars[..i].contains(pillar) {
                return Err(anyhow!("quality.pillars lists '{pillar}' twice"));
            }
        }
        if let Some(target) = self.quality.coverage_target
            && !(target > 0.0 && target <= 100.0)
        {
            return Err(anyhow!("quality.coverage_target must be in (0, 100]"));
        }
        if self.workflow.spec_dir.as_os_str().is_empty() {
            return Err(anyhow!("workflow.spec_dir must not be empty"));
        }
        for (name, cmd) in [
            ("phases.plan", &self.phases.plan),
            ("phases.run", &self.phases.run),
            ("phases.sync", &self.phases.sync),
            ("diagnostics.command", &self.diagnostics.command),
        ] {
            if cmd.is_empty() || cmd[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
        }
        if self.phases.timeout_secs == 0 || self.diagnostics.timeout_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.phases.output_limit_bytes == 0 {
            return Err(anyhow!("phases.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FlowConfig::default()`.
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    if !path.exists() {
        let cfg = FlowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FlowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FlowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
