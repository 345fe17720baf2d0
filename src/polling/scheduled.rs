//! Rate-scheduled polling.
//!
//! # Data Flow
//! ```text
//! timer tick (Scheduler)
//!     → update_async: hand the round to the AsyncExecutor
//!     → update: run the pipeline, classify the outcome
//!         breaker family  → already reported by the breaker layer, suppressed
//!         timeout         → warn, suppressed
//!         anything else   → returned to the executor, logged at error
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics::{self, PollOutcome};
use crate::polling::error::PollError;
use crate::polling::pipeline::{PollFuture, Poller};
use crate::resilience::failure::{Classify, FailureKind};
use crate::scheduling::{AsyncExecutor, Scheduler};

/// Drives a poller from a fixed-rate timer.
#[derive(Clone)]
pub struct ScheduledPoller {
    poller: Arc<dyn Poller>,
    executor: AsyncExecutor,
}

impl ScheduledPoller {
    pub fn new(poller: Arc<dyn Poller>, executor: AsyncExecutor) -> Self {
        tracing::info!(target_name = %poller.name(), "Scheduling polling metric");
        Self { poller, executor }
    }

    /// Dispatch one round to the executor and return immediately.
    pub fn update_async(&self) {
        let this = self.clone();
        self.executor
            .execute(self.poller.name().to_string(), async move { this.update().await });
    }

    /// Register the timer that calls [`ScheduledPoller::update_async`] every `period`.
    pub fn schedule(&self, scheduler: &Scheduler, period: Duration) {
        let this = self.clone();
        scheduler.every(format!("poll {}", self.poller.name()), period, move || {
            this.update_async();
            std::future::ready(())
        });
    }

    async fn poll(&self) -> Result<(), PollError> {
        let target = self.poller.name();
        match self.poller.update().await {
            Ok(()) => {
                metrics::record_poll(target, PollOutcome::Ok);
                Ok(())
            }
            Err(err) if err.signal().is_some() => {
                metrics::record_poll(target, PollOutcome::Rejected);
                Ok(())
            }
            Err(err) if err.failure_kind() == FailureKind::Timeout => {
                metrics::record_poll(target, PollOutcome::Suppressed);
                tracing::warn!(target_name = %target, error = %err, "Timed out polling");
                Ok(())
            }
            Err(err) => {
                metrics::record_poll(target, PollOutcome::Failed);
                Err(err)
            }
        }
    }
}

impl Poller for ScheduledPoller {
    fn name(&self) -> &str {
        self.poller.name()
    }

    fn update(&self) -> PollFuture<'_> {
        Box::pin(self.poll())
    }
}
