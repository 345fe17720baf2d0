//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a device or transport:
//!     → circuit_breaker.rs (fail fast while open, count handled failures)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → timeouts.rs (every outbound call has a deadline)
//!     → failure.rs (classify the error so the breaker can decide)
//! ```
//!
//! # Design Decisions
//! - Breakers decide on failure kinds, never on concrete error types
//! - Open family outcomes are reported through logging.rs by default

pub mod backoff;
pub mod circuit_breaker;
pub mod failure;
pub mod logging;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerError, BreakerSignal, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig,
    State,
};
pub use failure::{Classify, Failure, FailureKind};
pub use logging::log_breaker_error;
pub use retries::RetryPolicy;
