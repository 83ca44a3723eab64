//! Helpers for running child processes with timeouts, bounded output and
//! cancellation.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Limits applied to a single command invocation.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Marker error for a command killed because its token was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("command cancelled")]
pub struct CommandCancelled;

/// Run a command, capturing stdout/stderr up to `limits.output_limit_bytes`.
///
/// The child is killed when the timeout elapses (`timed_out = true`) or when
/// `cancel` fires, in which case the error downcasts to [`CommandCancelled`].
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub async fn run_command(
    mut cmd: Command,
    limits: CommandLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_handle = tokio::spawn(read_stream_limited(stdout, limit));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, limit));

    let mut timed_out = false;
    let status = tokio::select! {
        waited = child.wait() => waited.context("wait for command")?,
        _ = tokio::time::sleep(limits.timeout) => {
            warn!(timeout_secs = limits.timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().await.context("kill command")?;
            child.wait().await.context("wait command after kill")?
        }
        _ = cancel.cancelled() => {
            warn!("command cancelled, killing");
            child.kill().await.context("kill command")?;
            return Err(CommandCancelled.into());
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).await.context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).await.context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command and fail unless it exits successfully within the timeout.
pub async fn run_checked(
    cmd: Command,
    label: &str,
    limits: CommandLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    let output = run_command(cmd, limits, cancel)
        .await
        .with_context(|| format!("run {label}"))?;
    if output.timed_out {
        return Err(anyhow!("{label} timed out after {:?}", limits.timeout));
    }
    if !output.status.success() {
        return Err(anyhow!(
            "{label} failed with status {:?}: {}",
            output.status.code(),
            output.stderr_text()
        ));
    }
    Ok(output)
}

async fn join_output(
    handle: tokio::task::JoinHandle<Result<(Vec<u8>, usize)>>,
) -> Result<(Vec<u8>, usize)> {
    match handle.await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader task panicked")),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_stream_limited_counts_truncated_bytes() {
        let data: &[u8] = b"hello world";
        let (kept, truncated) = read_stream_limited(data, 5).await.expect("read");
        assert_eq!(kept, b"hello");
        assert_eq!(truncated, 6);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let cmd = Command::new("specflow-definitely-missing-binary");
        let err = run_command(cmd, CommandLimits::default(), &CancellationToken::new())
            .await
            .expect_err("spawn should fail");
        assert!(err.to_string().contains("spawn command"));
    }

    #[tokio::test]
    async fn cancelled_token_kills_the_child() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_command(cmd, CommandLimits::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(err.is::<CommandCancelled>());
    }

    #[tokio::test]
    async fn timeout_marks_output() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let limits = CommandLimits {
            timeout: Duration::from_millis(50),
            ..CommandLimits::default()
        };
        let output = run_command(cmd, limits, &CancellationToken::new())
            .await
            .expect("run");
        assert!(output.timed_out);
    }
}
