//! Retry logic for idempotent reads.
//!
//! # Responsibilities
//! - Decide whether a failure is retryable
//! - Re-run the operation with jittered exponential backoff
//!
//! # Design Decisions
//! - Only transient transport failures are retried; decode and consumer
//!   failures will not fix themselves
//! - Retries sit inside the circuit breaker, so one exhausted retry loop
//!   counts as a single breaker failure

use std::future::Future;

use crate::resilience::backoff::calculate_backoff;
use crate::resilience::failure::{Failure, FailureKind};

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Whether another attempt could succeed.
pub fn is_retryable(failure: &Failure) -> bool {
    matches!(
        failure.kind,
        FailureKind::Timeout | FailureKind::Connect | FailureKind::Io | FailureKind::Status
    )
}

/// Run `op` until it succeeds, fails with a non-retryable failure, or the
/// policy runs out of retries.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut op: F,
) -> Result<T, Failure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) if attempt < policy.max_retries && is_retryable(&failure) => {
                attempt += 1;
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::debug!(
                    target_name = %target,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => return Err(failure),
        }
    }
}
