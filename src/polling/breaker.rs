//! Breaker-guarded polling.

use crate::polling::error::PollError;
use crate::polling::pipeline::{Layer, Next, PollFuture};
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};

/// Runs the rest of the chain through a [`CircuitBreaker`].
///
/// Open family outcomes are logged here (warn for the transition, debug while
/// open) and passed outward as [`PollError::Breaker`] so outer layers can
/// still tell a rejected round from a successful one. Everything else
/// propagates unchanged.
pub struct CircuitBreakerPoller {
    breaker: CircuitBreaker,
}

impl CircuitBreakerPoller {
    pub fn new(breaker: CircuitBreaker) -> Self {
        tracing::info!(breaker = %breaker, "Configured poller with circuit breaker");
        Self { breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

fn report(target: &str, err: &BreakerError<PollError>) {
    match err {
        BreakerError::JustOpened { remaining, .. } => {
            tracing::warn!(
                target_name = %target,
                half_open_in = ?remaining,
                "Stop polling metric: open circuit breaker"
            );
        }
        BreakerError::HalfOpenFailed {
            remaining, cause, ..
        } => {
            tracing::warn!(
                target_name = %target,
                half_open_in = ?remaining,
                error = %cause.as_ref().map(ToString::to_string).unwrap_or_default(),
                "Failed polling metric"
            );
        }
        BreakerError::Open { remaining, .. } => {
            tracing::debug!(target_name = %target, half_open_in = ?remaining, "Skipped polling metric: circuit breaker is open");
        }
        BreakerError::Inner(_) => {}
    }
}

impl Layer for CircuitBreakerPoller {
    fn handle<'a>(&'a self, next: Next<'a>) -> PollFuture<'a> {
        Box::pin(async move {
            self.breaker.run(|| next.run()).await.map_err(|err| {
                report(next.target(), &err);
                PollError::from(err)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polling::pipeline::{Pipeline, Poller};
    use crate::resilience::circuit_breaker::BreakerSignal;
    use crate::resilience::failure::{Failure, FailureKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Failing {
        calls: AtomicU32,
        failure: Failure,
    }

    impl Poller for Failing {
        fn name(&self) -> &str {
            "heater"
        }

        fn update(&self) -> PollFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(PollError::failure("heater", self.failure.clone()))
            })
        }
    }

    fn guarded(failure: Failure) -> (Arc<Failing>, Pipeline) {
        let fetch = Arc::new(Failing {
            calls: AtomicU32::new(0),
            failure,
        });
        let breaker = CircuitBreaker::builder("heater")
            .failure_threshold(2)
            .open_delay(Duration::from_secs(60))
            .handle_all(FailureKind::IO_CLASS)
            .build();
        let pipeline = Pipeline::new(fetch.clone()).layer(CircuitBreakerPoller::new(breaker));
        (fetch, pipeline)
    }

    #[tokio::test]
    async fn test_breaker_family_is_signalled() {
        let (fetch, pipeline) = guarded(Failure::connect("refused"));

        let first = pipeline.update().await.unwrap_err();
        assert_eq!(first.signal(), None);

        let second = pipeline.update().await.unwrap_err();
        assert_eq!(second.signal(), Some(BreakerSignal::JustOpened));

        let third = pipeline.update().await.unwrap_err();
        assert_eq!(third.signal(), Some(BreakerSignal::Open));
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhandled_failure_propagates() {
        let (fetch, pipeline) = guarded(Failure::internal("bad mapping"));

        for _ in 0..4 {
            let err = pipeline.update().await.unwrap_err();
            assert_eq!(err.signal(), None);
        }
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 4);
    }
}
