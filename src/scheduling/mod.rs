//! Scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! scheduler.rs: fixed-rate timers (one per poller, resubscribe, keep-alive)
//!     → tick → executor.rs: fire-and-forget worker per poll round
//! ```
//!
//! # Design Decisions
//! - Timers stop on the shutdown broadcast; a timer dying otherwise is fatal
//! - Executor shutdown waits a bounded grace period, then aborts

pub mod executor;
pub mod scheduler;

pub use executor::AsyncExecutor;
pub use scheduler::Scheduler;
