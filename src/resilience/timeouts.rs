//! Deadlines for outbound calls.
//!
//! A timed-out call surfaces as a [`FailureKind::Timeout`] failure so that
//! breakers and the scheduled poller can tell it apart from other I/O errors.
//!
//! [`FailureKind::Timeout`]: crate::resilience::failure::FailureKind::Timeout

use std::future::Future;
use std::time::Duration;

use crate::resilience::failure::Failure;

/// Run `fut` with a deadline.
pub async fn with_timeout<T, F>(what: &str, deadline: Duration, fut: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, Failure>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Failure::timeout(format!(
            "{} did not complete within {:?}",
            what, deadline
        ))),
    }
}
