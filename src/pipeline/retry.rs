use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::PipelineError;

/// Bounded retry with a fixed (not exponential) pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the
/// attempt budget runs out. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut, R>(
    label: &str,
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retry = attempt < max_attempts && is_retryable(&err);
                warn!(
                    "{} failed (attempt {}/{}, retrying={}): {}",
                    label, attempt, max_attempts, retry, err
                );
                if !retry {
                    return Err(err);
                }
                tokio::time::sleep(policy.base_delay).await;
            }
        }
    }
}

/// `with_retry` using the pipeline's transient-error classifier.
pub async fn with_pipeline_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    with_retry(label, policy, operation, PipelineError::is_retryable).await
}
