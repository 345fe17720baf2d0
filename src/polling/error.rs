//! Poll errors.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::circuit_breaker::{BreakerError, BreakerSignal};
use crate::resilience::failure::{Classify, Failure, FailureKind};

/// Error returned by [`Poller::update`](crate::polling::Poller::update).
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// The fetch-and-publish round failed.
    #[error("Polling {target} failed: {source}")]
    Failure { target: String, source: Failure },

    /// A breaker guarding the round refused or aborted it.
    #[error("Circuit breaker {breaker} {signal}, half open in {remaining:?}")]
    Breaker {
        breaker: String,
        signal: BreakerSignal,
        remaining: Duration,
        cause: Option<String>,
    },
}

impl PollError {
    pub fn failure(target: impl Into<String>, source: Failure) -> Self {
        PollError::Failure {
            target: target.into(),
            source,
        }
    }

    /// The breaker signal, if this is an open family error.
    pub fn signal(&self) -> Option<BreakerSignal> {
        match self {
            PollError::Breaker { signal, .. } => Some(*signal),
            PollError::Failure { .. } => None,
        }
    }
}

impl Classify for PollError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            PollError::Failure { source, .. } => source.kind,
            PollError::Breaker { .. } => FailureKind::CircuitOpen,
        }
    }
}

impl From<BreakerError<PollError>> for PollError {
    fn from(err: BreakerError<PollError>) -> Self {
        let signal = err.signal();
        let remaining = err.remaining().unwrap_or_default();
        match err {
            BreakerError::Inner(e) => e,
            BreakerError::Open { breaker, .. } => PollError::Breaker {
                breaker,
                signal: BreakerSignal::Open,
                remaining,
                cause: None,
            },
            BreakerError::JustOpened { breaker, cause, .. }
            | BreakerError::HalfOpenFailed { breaker, cause, .. } => PollError::Breaker {
                breaker,
                signal: signal.unwrap_or(BreakerSignal::Open),
                remaining,
                cause: cause.map(|c| c.to_string()),
            },
        }
    }
}
