//! Resilient message bus over a reconnecting transport.
//!
//! # Responsibilities
//! - Remember every subscription ever requested
//! - Retry subscriptions that failed, in first-requested order
//! - Isolate consumers behind a per-topic circuit breaker
//! - Detect a silent connection and force a reconnect
//! - Resubscribe everything after the transport reconnected
//!
//! # Data Flow
//! ```text
//! subscribe(topic, consumer)
//!     → registry
//!     → connectivity breaker → transport.subscribe
//!         failure → pending queue
//!
//! resubscribe timer → drain pending FIFO, stop at first failure
//! keep-alive timer  → silent too long → connectivity.error(reconnect)
//! transport reconnected → close connectivity breaker
//!                       → pending = registry → drain
//!
//! message → last_message = now → topic breaker → consumer
//! ```
//!
//! # Design Decisions
//! - Subscription status only changes while the pending lock is held, so a
//!   subscription is never both active and queued
//! - One drain at a time; a timer drain finding another one running is
//!   skipped, a reconnect waits for it and drains afterwards
//! - Callbacks handed to the transport hold a weak reference to the bus

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::mqtt::transport::{Handler, Transport};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::failure::{Failure, FailureKind};
use crate::resilience::logging::log_breaker_error;
use crate::scheduling::Scheduler;

/// Processes one payload. A returned failure is logged and dropped.
pub type Consumer = Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), Failure>> + Send + Sync>;

/// Bus settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Maximum silence before a reconnect is forced.
    pub keep_alive: Duration,
    /// Thresholds shared by the connectivity and topic breakers.
    pub breaker: CircuitBreakerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(300),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Where a subscription currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionStatus {
    /// A subscribe call is in flight.
    Subscribing = 0,
    Active = 1,
    Pending = 2,
}

impl SubscriptionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SubscriptionStatus::Active,
            2 => SubscriptionStatus::Pending,
            _ => SubscriptionStatus::Subscribing,
        }
    }
}

struct Subscription {
    topic: String,
    consumer: Consumer,
    breaker: CircuitBreaker,
    status: AtomicU8,
}

impl Subscription {
    fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: SubscriptionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    async fn deliver(&self, payload: String) {
        tracing::debug!(topic = %self.topic, "Received message");
        metrics::record_message(&self.topic);

        let consumer = Arc::clone(&self.consumer);
        let result = self.breaker.run(|| consumer(payload)).await;
        if let Err(err) = result {
            if let Err(e) = log_breaker_error(&self.topic, err) {
                tracing::warn!(topic = %self.topic, error = %e, "Failed consuming message");
            }
        }
    }
}

struct Inner<T> {
    transport: T,
    connectivity: CircuitBreaker,
    registry: Mutex<Vec<Arc<Subscription>>>,
    pending: Mutex<VecDeque<Arc<Subscription>>>,
    draining: tokio::sync::Mutex<()>,
    started: Instant,
    last_message_ms: AtomicU64,
    last_attempt_ms: AtomicU64,
    keep_alive: Duration,
}

impl<T> Inner<T> {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn touch(&self) {
        self.last_message_ms.fetch_max(self.now_ms(), Ordering::AcqRel);
    }

    fn since(&self, mark: &AtomicU64) -> Duration {
        let mark = Duration::from_millis(mark.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(mark)
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Arc<Subscription>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Arc<Subscription>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Message bus adding fault isolation and resubscription to a [`Transport`].
pub struct ResilientBus<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResilientBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> ResilientBus<T> {
    pub fn new(transport: T, config: BusConfig) -> Self {
        let connectivity =
            CircuitBreaker::new(transport.name(), config.breaker, FailureKind::IO_CLASS);
        tracing::info!(
            breaker = %connectivity,
            keep_alive_secs = config.keep_alive.as_secs(),
            "Configured message bus"
        );

        let inner = Arc::new(Inner {
            transport,
            connectivity,
            registry: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            draining: tokio::sync::Mutex::new(()),
            started: Instant::now(),
            last_message_ms: AtomicU64::new(0),
            last_attempt_ms: AtomicU64::new(0),
            keep_alive: config.keep_alive,
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.on_reconnect(Arc::new(move || {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(inner) = weak.upgrade() {
                    ResilientBus { inner }.handle_reconnect().await;
                }
            }
            .boxed()
        }));

        Self { inner }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The breaker guarding subscribe and reconnect calls.
    pub fn connectivity(&self) -> &CircuitBreaker {
        &self.inner.connectivity
    }

    /// Subscribe `consumer` to `topic`.
    ///
    /// Never fails: a subscription that cannot be applied now is queued and
    /// retried by [`ResilientBus::drain_pending`].
    pub async fn subscribe(&self, topic: impl Into<String>, consumer: Consumer) {
        let topic = topic.into();
        let breaker = self.inner.connectivity.like(topic.clone(), FailureKind::ALL);
        let subscription = Arc::new(Subscription {
            topic,
            consumer,
            breaker,
            status: AtomicU8::new(SubscriptionStatus::Subscribing as u8),
        });
        self.inner.registry().push(Arc::clone(&subscription));

        if !self.try_subscribe(&subscription).await {
            self.enqueue(&subscription);
        }
    }

    /// Retry queued subscriptions in order until one fails.
    ///
    /// The failing entry goes back to the tail. Returns how many were applied.
    pub async fn drain_pending(&self) -> usize {
        let Ok(_draining) = self.inner.draining.try_lock() else {
            tracing::debug!("Pending subscriptions are already being drained");
            return 0;
        };
        self.drain_locked().await
    }

    /// Caller holds `draining`.
    async fn drain_locked(&self) -> usize {
        let queued = self.pending_count();
        if queued == 0 {
            return 0;
        }
        tracing::info!(pending = queued, "Resubscribing pending subscriptions");

        let mut applied = 0;
        while let Some(subscription) = self.pop_pending() {
            if !self.try_subscribe(&subscription).await {
                self.enqueue(&subscription);
                break;
            }
            applied += 1;
        }

        metrics::record_pending_subscriptions(self.pending_count());
        applied
    }

    /// Force a reconnect when no message arrived for longer than the keep-alive.
    ///
    /// The attempt always counts as one connectivity failure. One attempt is
    /// made per keep-alive period of silence. Returns whether a reconnect was
    /// attempted.
    pub async fn keep_alive(&self) -> bool {
        let silence = self.silence();
        if silence <= self.inner.keep_alive
            || self.inner.since(&self.inner.last_attempt_ms) <= self.inner.keep_alive
        {
            return false;
        }
        self.inner
            .last_attempt_ms
            .store(self.inner.now_ms(), Ordering::Release);

        let transport = &self.inner.transport;
        let result = self
            .inner
            .connectivity
            .error(|| async move {
                tracing::warn!(
                    silence_secs = silence.as_secs(),
                    "MQTT seems inactive, reconnecting"
                );
                transport.reconnect().await
            })
            .await;

        match result {
            Ok(()) => true,
            Err(BreakerError::Open { .. }) => {
                tracing::debug!("Skipped reconnect: circuit breaker is open");
                false
            }
            Err(err) => {
                if let Err(e) = log_breaker_error("keep alive", err) {
                    tracing::warn!(error = %e, "Reconnect failed");
                }
                true
            }
        }
    }

    /// Time since the last message on any topic, or since creation.
    pub fn silence(&self) -> Duration {
        self.inner.since(&self.inner.last_message_ms)
    }

    /// Register the resubscribe and keep-alive timers.
    pub fn schedule(&self, scheduler: &Scheduler, resubscribe_rate: Duration) {
        let bus = self.clone();
        scheduler.every("mqtt resubscribe", resubscribe_rate, move || {
            let bus = bus.clone();
            async move {
                bus.drain_pending().await;
            }
        });

        let bus = self.clone();
        scheduler.every("mqtt keep alive", check_period(self.inner.keep_alive), move || {
            let bus = bus.clone();
            async move {
                bus.keep_alive().await;
            }
        });
    }

    /// Drop pending work and close the transport.
    pub async fn close(&self) -> Result<(), Failure> {
        self.inner.pending().clear();
        metrics::record_pending_subscriptions(0);
        self.inner.transport.close().await
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Topics waiting to be subscribed, in retry order.
    pub fn pending_topics(&self) -> Vec<String> {
        self.inner
            .pending()
            .iter()
            .map(|s| s.topic.clone())
            .collect()
    }

    pub fn status(&self, topic: &str) -> Option<SubscriptionStatus> {
        self.inner
            .registry()
            .iter()
            .find(|s| s.topic == topic)
            .map(|s| s.status())
    }

    async fn handle_reconnect(&self) {
        tracing::info!("Transport reconnected, resubscribing all");
        self.inner.connectivity.close();
        self.resubscribe_all();

        // A running drain may already have given up on the old connection.
        let _draining = match self.inner.draining.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Waiting for running drain before resubscribing");
                self.inner.draining.lock().await
            }
        };
        self.drain_locked().await;
    }

    fn resubscribe_all(&self) {
        let registry = self.inner.registry();
        let mut pending = self.inner.pending();
        pending.clear();
        for subscription in registry.iter() {
            subscription.set_status(SubscriptionStatus::Pending);
            pending.push_back(Arc::clone(subscription));
        }
        metrics::record_pending_subscriptions(pending.len());
    }

    fn enqueue(&self, subscription: &Arc<Subscription>) {
        let mut pending = self.inner.pending();
        if subscription.status() != SubscriptionStatus::Pending {
            subscription.set_status(SubscriptionStatus::Pending);
            pending.push_back(Arc::clone(subscription));
        }
        metrics::record_pending_subscriptions(pending.len());
    }

    fn pop_pending(&self) -> Option<Arc<Subscription>> {
        let mut pending = self.inner.pending();
        let subscription = pending.pop_front()?;
        subscription.set_status(SubscriptionStatus::Subscribing);
        Some(subscription)
    }

    fn mark_active(&self, subscription: &Subscription) {
        let _pending = self.inner.pending();
        if subscription.status() == SubscriptionStatus::Subscribing {
            subscription.set_status(SubscriptionStatus::Active);
        }
    }

    fn handler(&self, subscription: &Arc<Subscription>) -> Handler {
        let inner = Arc::downgrade(&self.inner);
        let subscription = Arc::clone(subscription);
        Arc::new(move |payload| {
            let inner = Weak::clone(&inner);
            let subscription = Arc::clone(&subscription);
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.touch();
                }
                subscription.deliver(payload).await;
            }
            .boxed()
        })
    }

    async fn try_subscribe(&self, subscription: &Arc<Subscription>) -> bool {
        let topic = subscription.topic.as_str();
        let handler = self.handler(subscription);
        let transport = &self.inner.transport;

        match self
            .inner
            .connectivity
            .run(|| transport.subscribe(topic, handler))
            .await
        {
            Ok(()) => {
                self.mark_active(subscription);
                tracing::info!(topic = %topic, "Subscribed successfully");
                true
            }
            Err(BreakerError::JustOpened { .. }) => {
                tracing::warn!(topic = %topic, "Stop subscribing: circuit breaker opened");
                false
            }
            Err(BreakerError::HalfOpenFailed { cause, .. }) => {
                tracing::warn!(
                    topic = %topic,
                    error = %cause.map(|c| c.to_string()).unwrap_or_default(),
                    "Subscribing failed"
                );
                false
            }
            Err(BreakerError::Open { .. }) => {
                tracing::info!(topic = %topic, "Subscribing failed: circuit breaker open");
                false
            }
            Err(BreakerError::Inner(e)) => {
                tracing::warn!(topic = %topic, error = %e, "Subscribing failed");
                false
            }
        }
    }
}

/// Keep-alive timer period: a thirtieth of the threshold, at least one second.
fn check_period(keep_alive: Duration) -> Duration {
    let period = (keep_alive / 30).max(Duration::from_secs(1));
    period.min(keep_alive).max(Duration::from_millis(1))
}
