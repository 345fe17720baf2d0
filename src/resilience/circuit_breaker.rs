//! Circuit breaker for unreliable devices and transports.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: operation assumed down, calls fail fast
//! - Half-Open: a single trial call tests whether the operation recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive handled failures >= failure_threshold
//! Open → Half-Open: first call at or after opened_at + open_delay (the trial)
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any handled failure
//! ```
//!
//! # Outcomes
//! A call through the breaker ends in exactly one of: the result, the
//! operation's own error ([`BreakerError::Inner`]), or one of the open family
//! [`BreakerError::JustOpened`], [`BreakerError::HalfOpenFailed`],
//! [`BreakerError::Open`]. Only the call that performed a transition to open
//! sees `JustOpened` or `HalfOpenFailed`; everybody else sees `Open`.
//!
//! # Design Decisions
//! - All state lives behind one mutex that is never held across an await
//! - Every transition bumps a generation; outcomes of calls admitted under an
//!   older generation never move the state machine
//! - The open delay gate is a check-then-reject, it never sleeps

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::failure::{Classify, FailureKind};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => f.write_str("closed"),
            State::HalfOpen => f.write_str("half open"),
            State::Open => f.write_str("open"),
        }
    }
}

/// Thresholds and delay of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive handled failures that open a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
    /// Time an open breaker rejects calls before letting a trial through.
    pub open_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_delay: Duration::from_secs(60),
        }
    }
}

/// Open family signals, ordered by logging severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BreakerSignal {
    /// Rejected without invoking the operation.
    Open,
    /// The half-open trial failed and the breaker reopened.
    HalfOpenFailed,
    /// This call opened a closed breaker.
    JustOpened,
}

impl fmt::Display for BreakerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerSignal::Open => f.write_str("is open"),
            BreakerSignal::HalfOpenFailed => f.write_str("was half open"),
            BreakerSignal::JustOpened => f.write_str("opened"),
        }
    }
}

/// Errors returned by calls through a [`CircuitBreaker`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// This call's failure opened the breaker.
    JustOpened {
        breaker: String,
        remaining: Duration,
        cause: Option<E>,
    },
    /// This call was the half-open trial and it failed.
    HalfOpenFailed {
        breaker: String,
        remaining: Duration,
        cause: Option<E>,
    },
    /// The breaker is open; the operation was not invoked.
    Open { breaker: String, remaining: Duration },
    /// The operation failed and the breaker stayed where it was.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// The open family signal, or `None` for [`BreakerError::Inner`].
    pub fn signal(&self) -> Option<BreakerSignal> {
        match self {
            BreakerError::JustOpened { .. } => Some(BreakerSignal::JustOpened),
            BreakerError::HalfOpenFailed { .. } => Some(BreakerSignal::HalfOpenFailed),
            BreakerError::Open { .. } => Some(BreakerSignal::Open),
            BreakerError::Inner(_) => None,
        }
    }

    /// Time until the breaker lets the next trial through.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            BreakerError::JustOpened { remaining, .. }
            | BreakerError::HalfOpenFailed { remaining, .. }
            | BreakerError::Open { remaining, .. } => Some(*remaining),
            BreakerError::Inner(_) => None,
        }
    }

    /// Name of the breaker that produced an open family error.
    pub fn breaker(&self) -> Option<&str> {
        match self {
            BreakerError::JustOpened { breaker, .. }
            | BreakerError::HalfOpenFailed { breaker, .. }
            | BreakerError::Open { breaker, .. } => Some(breaker),
            BreakerError::Inner(_) => None,
        }
    }

    /// The operation's own error, if one travelled with this outcome.
    pub fn cause(&self) -> Option<&E> {
        match self {
            BreakerError::JustOpened { cause, .. } | BreakerError::HalfOpenFailed { cause, .. } => {
                cause.as_ref()
            }
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }

    pub fn is_open_family(&self) -> bool {
        self.signal().is_some()
    }

    pub fn map<F, G>(self, f: G) -> BreakerError<F>
    where
        G: FnOnce(E) -> F,
    {
        match self {
            BreakerError::JustOpened {
                breaker,
                remaining,
                cause,
            } => BreakerError::JustOpened {
                breaker,
                remaining,
                cause: cause.map(f),
            },
            BreakerError::HalfOpenFailed {
                breaker,
                remaining,
                cause,
            } => BreakerError::HalfOpenFailed {
                breaker,
                remaining,
                cause: cause.map(f),
            },
            BreakerError::Open { breaker, remaining } => BreakerError::Open { breaker, remaining },
            BreakerError::Inner(e) => BreakerError::Inner(f(e)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::JustOpened {
                breaker,
                remaining,
                cause,
            }
            | BreakerError::HalfOpenFailed {
                breaker,
                remaining,
                cause,
            } => {
                let signal = self.signal().unwrap_or(BreakerSignal::Open);
                write!(
                    f,
                    "Circuit breaker {} {}, half open in {:.1?}",
                    breaker, signal, remaining
                )?;
                if let Some(cause) = cause {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
            BreakerError::Open { breaker, remaining } => {
                write!(
                    f,
                    "Circuit breaker {} is open, half open in {:.1?}",
                    breaker, remaining
                )
            }
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::JustOpened { cause, .. } | BreakerError::HalfOpenFailed { cause, .. } => {
                cause.as_ref().map(|e| e as &(dyn Error + 'static))
            }
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => e.source(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

/// What a recorded failure did to the state machine.
enum Verdict {
    /// Counted, no transition.
    Counted,
    /// The call ends in an open family error.
    Tripped(Trip),
}

/// Open family outcome of a recorded failure.
enum Trip {
    /// Closed → Open by this call.
    Opened(Duration),
    /// Half-Open → Open by this call.
    Reopened(Duration),
    /// The call was admitted before a transition that already opened the breaker.
    AlreadyOpen(Duration),
}

/// Admission ticket for one call.
///
/// Dropping an unresolved half-open permit (cancelled or panicked trial)
/// frees the trial slot again.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    admitted_in: State,
    resolved: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.resolved || self.admitted_in != State::HalfOpen {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.generation == self.generation {
            inner.trial_in_flight = false;
        }
    }
}

/// Per-operation circuit breaker.
///
/// Clones share state. Use [`CircuitBreaker::like`] for an independent breaker
/// with the same thresholds.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    handled: Arc<HashSet<FailureKind>>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a breaker handling the given failure kinds.
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        handled: impl IntoIterator<Item = FailureKind>,
    ) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            open_delay: config.open_delay,
        };
        let name: String = name.into();
        metrics::record_breaker_state(&name, State::Closed);
        Self {
            name: name.into(),
            config: Arc::new(config),
            handled: Arc::new(handled.into_iter().collect()),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
                trial_in_flight: false,
                generation: 0,
            })),
        }
    }

    /// Start a builder.
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            handled: HashSet::new(),
        }
    }

    /// An independent breaker with this breaker's thresholds.
    pub fn like(
        &self,
        name: impl Into<String>,
        handled: impl IntoIterator<Item = FailureKind>,
    ) -> Self {
        Self::new(name, self.config.as_ref().clone(), handled)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether failures of `kind` count against this breaker.
    pub fn handles(&self, kind: FailureKind) -> bool {
        self.handled.contains(&kind)
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == State::HalfOpen
    }

    /// Force the breaker closed and reset its counters.
    ///
    /// Calls admitted before the reset no longer affect the state.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state != State::Closed {
            self.transition(&mut inner, State::Closed, Instant::now());
        } else {
            inner.failures = 0;
            inner.successes = 0;
            inner.generation += 1;
        }
    }

    /// Call `op` through the breaker and return its result.
    pub async fn get<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let mut permit = self.acquire().map_err(|remaining| self.open_error(remaining))?;

        match op().await {
            Ok(value) => {
                self.on_success(&mut permit);
                Ok(value)
            }
            Err(e) if self.handles(e.failure_kind()) => {
                let verdict = self.on_failure(&mut permit);
                Err(self.failure_error(verdict, e))
            }
            Err(e) => Err(BreakerError::Inner(e)),
        }
    }

    /// Call `op` through the breaker, discarding its result.
    pub async fn run<F, Fut, T, E>(&self, op: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.get(op).await.map(|_| ())
    }

    /// Run `action` and tally the call as one failure whatever its outcome.
    ///
    /// Lets a caller register degradation (a stale connection, say) without
    /// the action itself failing. A successful action returns `Ok(())` unless
    /// the tally opened the breaker.
    pub async fn error<F, Fut, E>(&self, action: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut permit = self.acquire().map_err(|remaining| self.open_error(remaining))?;
        let outcome = action().await;

        // The registration marker: counted here, never surfaced.
        let verdict = self.on_failure(&mut permit);
        match (verdict, outcome) {
            (Verdict::Counted, Ok(())) => Ok(()),
            (Verdict::Counted, Err(e)) => Err(BreakerError::Inner(e)),
            (Verdict::Tripped(trip), outcome) => Err(self.trip_error(trip, outcome.err())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining(&self, inner: &Inner, now: Instant) -> Duration {
        inner
            .opened_at
            .map(|at| match at.checked_add(self.config.open_delay) {
                Some(half_open_at) => half_open_at.saturating_duration_since(now),
                // Beyond the clock's range: the breaker never half-opens.
                None => Duration::MAX,
            })
            .unwrap_or(Duration::ZERO)
    }

    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut inner = self.lock();
        let now = Instant::now();

        let admitted_in = match inner.state {
            State::Closed => State::Closed,
            State::Open => {
                let remaining = self.remaining(&inner, now);
                if !remaining.is_zero() {
                    return Err(remaining);
                }
                self.transition(&mut inner, State::HalfOpen, now);
                inner.trial_in_flight = true;
                State::HalfOpen
            }
            State::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(Duration::ZERO);
                }
                inner.trial_in_flight = true;
                State::HalfOpen
            }
        };

        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            admitted_in,
            resolved: false,
        })
    }

    fn on_success(&self, permit: &mut Permit<'_>) {
        permit.resolved = true;
        let mut inner = self.lock();
        if inner.generation != permit.generation {
            return;
        }

        match permit.admitted_in {
            State::Closed => inner.failures = 0,
            State::HalfOpen => {
                inner.trial_in_flight = false;
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    self.transition(&mut inner, State::Closed, Instant::now());
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(&self, permit: &mut Permit<'_>) -> Verdict {
        permit.resolved = true;
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.generation != permit.generation {
            return match inner.state {
                State::Open => Verdict::Tripped(Trip::AlreadyOpen(self.remaining(&inner, now))),
                State::Closed | State::HalfOpen => Verdict::Counted,
            };
        }

        match permit.admitted_in {
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    self.transition(&mut inner, State::Open, now);
                    Verdict::Tripped(Trip::Opened(self.config.open_delay))
                } else {
                    Verdict::Counted
                }
            }
            State::HalfOpen => {
                self.transition(&mut inner, State::Open, now);
                Verdict::Tripped(Trip::Reopened(self.config.open_delay))
            }
            State::Open => Verdict::Tripped(Trip::AlreadyOpen(self.remaining(&inner, now))),
        }
    }

    fn transition(&self, inner: &mut Inner, to: State, now: Instant) {
        tracing::debug!(breaker = %self.name, from = %inner.state, to = %to, "Circuit breaker transition");
        inner.state = to;
        inner.generation += 1;
        inner.failures = 0;
        inner.successes = 0;
        inner.trial_in_flight = false;
        inner.opened_at = (to == State::Open).then_some(now);
        metrics::record_breaker_state(&self.name, to);
    }

    fn open_error<E>(&self, remaining: Duration) -> BreakerError<E> {
        BreakerError::Open {
            breaker: self.name.to_string(),
            remaining,
        }
    }

    fn failure_error<E>(&self, verdict: Verdict, cause: E) -> BreakerError<E> {
        match verdict {
            Verdict::Counted => BreakerError::Inner(cause),
            Verdict::Tripped(trip) => self.trip_error(trip, Some(cause)),
        }
    }

    fn trip_error<E>(&self, trip: Trip, cause: Option<E>) -> BreakerError<E> {
        let breaker = self.name.to_string();
        match trip {
            Trip::Opened(remaining) => BreakerError::JustOpened {
                breaker,
                remaining,
                cause,
            },
            Trip::Reopened(remaining) => BreakerError::HalfOpenFailed {
                breaker,
                remaining,
                cause,
            },
            Trip::AlreadyOpen(remaining) => BreakerError::Open { breaker, remaining },
        }
    }
}

impl fmt::Display for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(failureThreshold={}, successThreshold={}, delay={:?})",
            self.name, self.config.failure_threshold, self.config.success_threshold, self.config.open_delay
        )
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("handled", &self.handled)
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    handled: HashSet<FailureKind>,
}

impl CircuitBreakerBuilder {
    /// Values below 1 are raised to 1.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Values below 1 are raised to 1.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.config.open_delay = delay;
        self
    }

    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Count failures of `kind`.
    pub fn handle(mut self, kind: FailureKind) -> Self {
        self.handled.insert(kind);
        self
    }

    pub fn handle_all(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.handled.extend(kinds);
        self
    }

    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.name, self.config, self.handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::failure::Failure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(failures: u32, successes: u32, delay: Duration) -> CircuitBreaker {
        CircuitBreaker::builder("test")
            .failure_threshold(failures)
            .success_threshold(successes)
            .open_delay(delay)
            .handle_all(FailureKind::IO_CLASS)
            .build()
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<Failure>> {
        breaker.run(|| async { Err::<(), _>(Failure::io("down")) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<Failure>> {
        breaker.get(|| async { Ok::<_, Failure>(42) }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let breaker = breaker(3, 1, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = breaker
                .run(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Failure::io("down"))
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }

        assert!(breaker.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(2, 1, Duration::from_secs(60));

        let _ = fail(&breaker).await;
        assert_eq!(succeed(&breaker).await.ok(), Some(42));
        let result = fail(&breaker).await;

        assert!(matches!(result, Err(BreakerError::Inner(_))));
        assert!(breaker.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_just_opened_then_open() {
        let breaker = breaker(2, 2, Duration::from_secs(1));

        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        let opened = fail(&breaker).await;
        assert!(matches!(opened, Err(BreakerError::JustOpened { cause: Some(_), .. })));

        let calls = AtomicUsize::new(0);
        let rejected = breaker
            .get(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            })
            .await;
        assert!(matches!(rejected, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn test_unreachable_delay_never_half_opens() {
        let breaker = breaker(1, 1, Duration::from_secs(i64::MAX as u64));

        assert!(matches!(fail(&breaker).await, Err(BreakerError::JustOpened { .. })));
        let rejected = succeed(&breaker).await;
        assert!(matches!(
            rejected,
            Err(BreakerError::Open { remaining, .. }) if remaining == Duration::MAX
        ));
        assert!(breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery_needs_success_threshold() {
        let breaker = breaker(2, 2, Duration::from_secs(1));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert_eq!(succeed(&breaker).await.ok(), Some(42));
        assert!(breaker.is_half_open());
        assert_eq!(succeed(&breaker).await.ok(), Some(42));
        assert!(breaker.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_not_allowed_before_delay() {
        let breaker = breaker(1, 1, Duration::from_secs(10));
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        let result = succeed(&breaker).await;

        match result {
            Err(BreakerError::Open { remaining, .. }) => {
                assert_eq!(remaining, Duration::from_secs(1));
            }
            other => panic!("expected open, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(2, 2, Duration::from_secs(1));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_millis(1100)).await;

        let result = fail(&breaker).await;
        assert!(matches!(result, Err(BreakerError::HalfOpenFailed { .. })));
        assert!(breaker.is_open());

        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_while_half_open() {
        let breaker = breaker(1, 1, Duration::from_secs(1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .get(|| async move {
                    let _ = wait.await;
                    Ok::<_, Failure>(1)
                })
                .await
        });
        tokio::task::yield_now().await;

        assert!(breaker.is_half_open());
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));

        let _ = release.send(());
        let tried = trial.await.expect("trial task");
        assert_eq!(tried.ok(), Some(1));
        assert!(breaker.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let breaker = breaker(1, 1, Duration::from_secs(1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .get(|| std::future::pending::<Result<(), Failure>>())
                .await
        });
        tokio::task::yield_now().await;
        trial.abort();
        let _ = trial.await;

        assert_eq!(succeed(&breaker).await.ok(), Some(42));
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn test_unhandled_kind_never_counts() {
        let breaker = breaker(1, 1, Duration::from_secs(60));

        for _ in 0..5 {
            let result = breaker
                .run(|| async { Err::<(), _>(Failure::internal("bug")) })
                .await;
            match result {
                Err(BreakerError::Inner(failure)) => assert_eq!(failure.kind, FailureKind::Internal),
                other => panic!("expected inner, got {:?}", other),
            }
        }

        assert!(breaker.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_kind_in_half_open_keeps_state() {
        let breaker = breaker(1, 1, Duration::from_secs(1));
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let result = breaker
            .run(|| async { Err::<(), _>(Failure::internal("bug")) })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
        assert!(breaker.is_half_open());

        assert_eq!(succeed(&breaker).await.ok(), Some(42));
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn test_error_counts_successful_action() {
        let breaker = breaker(2, 1, Duration::from_secs(60));
        let runs = AtomicUsize::new(0);

        let first = breaker
            .error(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            })
            .await;
        assert!(first.is_ok());
        assert!(breaker.is_closed());

        let second = breaker
            .error(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            })
            .await;
        assert!(matches!(second, Err(BreakerError::JustOpened { cause: None, .. })));
        assert!(breaker.is_open());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_rejected_while_open() {
        let breaker = breaker(1, 1, Duration::from_secs(60));
        let _ = fail(&breaker).await;

        let runs = AtomicUsize::new(0);
        let result = breaker
            .error(|| async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Failure>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_resets() {
        let breaker = breaker(1, 1, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        assert!(breaker.is_open());

        breaker.close();

        assert!(breaker.is_closed());
        assert_eq!(succeed(&breaker).await.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_concurrent_failures_single_winner() {
        let breaker = Arc::new(breaker(1, 1, Duration::from_secs(60)));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                breaker
                    .run(|| async move {
                        barrier.wait().await;
                        Err::<(), _>(Failure::io("down"))
                    })
                    .await
            }));
        }

        let mut just_opened = 0;
        for handle in handles {
            let result = handle.await.expect("task");
            if matches!(result, Err(BreakerError::JustOpened { .. })) {
                just_opened += 1;
            } else {
                assert!(matches!(result, Err(BreakerError::Open { .. })));
            }
        }

        assert_eq!(just_opened, 1);
    }

    #[test]
    fn test_signal_severity_order() {
        assert!(BreakerSignal::JustOpened > BreakerSignal::HalfOpenFailed);
        assert!(BreakerSignal::HalfOpenFailed > BreakerSignal::Open);
    }

    #[test]
    fn test_like_copies_thresholds() {
        let prototype = breaker(4, 3, Duration::from_secs(7));
        let topic = prototype.like("sensors/kitchen", FailureKind::ALL);

        assert_eq!(topic.config(), prototype.config());
        assert_eq!(topic.name(), "sensors/kitchen");
        assert!(topic.handles(FailureKind::Consumer));
        assert!(!prototype.handles(FailureKind::Consumer));
    }

    #[test]
    fn test_display() {
        let breaker = breaker(3, 1, Duration::from_secs(5));
        assert_eq!(
            breaker.to_string(),
            "test(failureThreshold=3, successThreshold=1, delay=5s)"
        );
    }
}
