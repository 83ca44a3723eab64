//! Phase executor abstraction.
//!
//! The [`PhaseExecutor`] trait decouples workflow orchestration from whatever
//! actually performs Plan, Run and Sync. Any error is a phase failure. Tests
//! use scripted executors that fail on demand without spawning processes.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::core::types::Phase;
use crate::io::config::PhaseCommands;
use crate::io::process::{CommandLimits, run_checked};

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute_plan(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()>;

    async fn execute_run(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()>;

    async fn execute_sync(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()>;
}

/// Dispatch `phase` to the matching executor method.
pub async fn execute_phase(
    executor: &dyn PhaseExecutor,
    phase: Phase,
    cancel: &CancellationToken,
    spec_id: &str,
    work_dir: &Path,
) -> Result<()> {
    match phase {
        Phase::Plan => executor.execute_plan(cancel, spec_id, work_dir).await,
        Phase::Run => executor.execute_run(cancel, spec_id, work_dir).await,
        Phase::Sync => executor.execute_sync(cancel, spec_id, work_dir).await,
    }
}

/// Executor that runs a configured command per phase inside the worktree.
#[derive(Debug, Clone)]
pub struct CommandPhaseExecutor {
    commands: PhaseCommands,
}

impl CommandPhaseExecutor {
    pub fn new(commands: PhaseCommands) -> Self {
        Self { commands }
    }

    fn argv(&self, phase: Phase, spec_id: &str) -> Vec<String> {
        let template = match phase {
            Phase::Plan => &self.commands.plan,
            Phase::Run => &self.commands.run,
            Phase::Sync => &self.commands.sync,
        };
        render_argv(template, spec_id)
    }

    #[instrument(skip_all, fields(phase = %phase, spec_id = spec_id))]
    async fn run_phase(
        &self,
        phase: Phase,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        let argv = self.argv(phase, spec_id);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("{phase} command is empty"))?;
        info!(workdir = %work_dir.display(), program = %program, "starting phase command");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(work_dir);
        let limits = CommandLimits {
            timeout: Duration::from_secs(self.commands.timeout_secs),
            output_limit_bytes: self.commands.output_limit_bytes,
        };
        run_checked(cmd, &format!("{phase} command"), limits, cancel).await?;
        Ok(())
    }
}

#[async_trait]
impl PhaseExecutor for CommandPhaseExecutor {
    async fn execute_plan(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.run_phase(Phase::Plan, cancel, spec_id, work_dir).await
    }

    async fn execute_run(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.run_phase(Phase::Run, cancel, spec_id, work_dir).await
    }

    async fn execute_sync(
        &self,
        cancel: &CancellationToken,
        spec_id: &str,
        work_dir: &Path,
    ) -> Result<()> {
        self.run_phase(Phase::Sync, cancel, spec_id, work_dir).await
    }
}

fn render_argv(template: &[String], spec_id: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{spec_id}", spec_id))
        .collect()
}
