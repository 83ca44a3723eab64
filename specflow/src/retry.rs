//! Exponential backoff for transient code host failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FlowError, Result};
use crate::io::config::IssueConfig;

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IssueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IssueConfig::default())
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for `delay`. Returns `false` if `cancel` fired first.
    async fn sleep(&self, cancel: &CancellationToken, delay: Duration) -> bool;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, cancel: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Run `attempt` until it succeeds, the policy is exhausted, or `cancel` fires.
///
/// No sleep follows the final failed attempt.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.total_attempts();
    let mut made = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FlowError::cancelled(operation));
        }
        made += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlowError::cancelled(operation)),
            outcome = attempt() => outcome,
        };
        let source = match outcome {
            Ok(value) => {
                if made > 1 {
                    debug!(operation, attempt = made, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(_) if cancel.is_cancelled() => return Err(FlowError::cancelled(operation)),
            Err(source) => source,
        };
        if made >= attempts {
            warn!(operation, attempts = made, err = %source, "retries exhausted");
            return Err(FlowError::RetryExhausted {
                operation: operation.to_string(),
                attempts: made,
                source,
            });
        }
        let delay = policy.delay_for_attempt(made);
        warn!(
            operation,
            attempt = made,
            delay_ms = delay.as_millis() as u64,
            err = %source,
            "attempt failed, backing off"
        );
        if !sleeper.sleep(cancel, delay).await {
            return Err(FlowError::cancelled(operation));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;

    use super::*;
    use crate::test_support::RecordingSleeper;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn delay_doubles_per_failure() {
        let p = policy(3);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let calls = Arc::new(AtomicU32::new(0));
        let value = retry(&policy(3), &sleeper, &CancellationToken::new(), "comment", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("502"))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .expect("retry");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_without_trailing_sleep() {
        let sleeper = RecordingSleeper::default();
        let err = retry(&policy(2), &sleeper, &CancellationToken::new(), "close", || async {
            Err::<(), _>(anyhow!("timeout"))
        })
        .await
        .expect_err("exhausted");
        match err {
            FlowError::RetryExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "close");
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "timeout");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let sleeper = RecordingSleeper::default();
        let err = retry(&policy(0), &sleeper, &CancellationToken::new(), "label", || async {
            Err::<(), _>(anyhow!("nope"))
        })
        .await
        .expect_err("exhausted");
        assert!(matches!(err, FlowError::RetryExhausted { attempts: 1, .. }));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts() {
        let cancel = CancellationToken::new();
        let sleeper = RecordingSleeper::cancelling(cancel.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let err = retry(&policy(5), &sleeper, &cancel, "comment", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("flaky"))
            }
        })
        .await
        .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokio_sleeper_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!TokioSleeper.sleep(&cancel, Duration::from_secs(60)).await);
    }
}
