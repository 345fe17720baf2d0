//! Fire-and-forget task execution.
//!
//! # Responsibilities
//! - Run one unit of work per timer tick on its own task
//! - Report failures and panics of that work; nothing escapes to the timer
//! - Await in-flight work on shutdown, up to a grace period
//!
//! # Design Decisions
//! - Tasks live in a `JoinSet` so shutdown can await or abort all of them
//! - Finished tasks are reaped on every submission, keeping the set small
//!   without a dedicated reaper task

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};

/// Runs tasks detached from the caller.
///
/// Clones share the same task set.
#[derive(Clone, Default)]
pub struct AsyncExecutor {
    tasks: Arc<Mutex<JoinSet<()>>>,
    closed: Arc<AtomicBool>,
}

impl AsyncExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task`. An error it returns is logged at error level.
    ///
    /// Returns false once the executor has been shut down.
    pub fn execute<F, E>(&self, name: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(task = %name, "Executor is shut down, dropping task");
            return false;
        }

        let mut tasks = self.lock();
        while let Some(finished) = tasks.try_join_next() {
            report(finished);
        }

        tasks.spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(task = %name, error = %e, "Error in async task");
            }
        });
        true
    }

    /// Tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, await running ones up to `grace`, abort the rest.
    pub async fn shutdown(&self, grace: Duration) {
        self.closed.store(true, Ordering::Release);
        let mut tasks = std::mem::take(&mut *self.lock());
        let running = tasks.len();

        let drained = tokio::time::timeout(grace, async {
            while let Some(finished) = tasks.join_next().await {
                report(finished);
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!(tasks = running, "Async tasks completed"),
            Err(_) => {
                tracing::warn!(
                    remaining = tasks.len(),
                    grace_secs = grace.as_secs_f64(),
                    "Aborting async tasks after shutdown grace period"
                );
                tasks.shutdown().await;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn report(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            tracing::error!(error = %e, "Async task panicked");
        }
    }
}
