//! Fixed-rate timers.
//!
//! Every timer is a task looping over `tokio::time::interval` until the
//! shutdown broadcast fires. A timer that dies any other way is reported to
//! the [`Supervisor`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::supervisor::{Fatal, Supervisor};

/// Owner of all periodic timers.
#[derive(Clone)]
pub struct Scheduler {
    shutdown: broadcast::Sender<()>,
    supervisor: Supervisor,
    timers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(shutdown: &Shutdown, supervisor: Supervisor) -> Self {
        Self {
            shutdown: shutdown.sender(),
            supervisor,
            timers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `task` every `period`, starting immediately.
    ///
    /// Ticks of one timer never overlap; long work should be handed to an
    /// [`AsyncExecutor`](crate::scheduling::AsyncExecutor).
    pub fn every<F, Fut>(&self, name: impl Into<String>, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!(timer = %name, period_ms = period.as_millis() as u64, "Scheduling timer");

        let timer = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => task().await,
                }
            }
        });

        let supervisor = self.supervisor.clone();
        let watcher = tokio::spawn(async move {
            match timer.await {
                Ok(()) => tracing::debug!(timer = %name, "Timer stopped"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => supervisor.fatal(Fatal::TimerStopped {
                    name,
                    reason: e.to_string(),
                }),
            }
        });

        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(watcher);
    }

    pub fn timer_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Await timers after shutdown was triggered, aborting stragglers after `grace`.
    pub async fn join(&self, grace: Duration) {
        let timers = std::mem::take(&mut *self.timers.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = time::Instant::now() + grace;

        for mut timer in timers {
            if time::timeout_at(deadline, &mut timer).await.is_err() {
                tracing::warn!("Aborting timer after shutdown grace period");
                timer.abort();
            }
        }
    }
}
