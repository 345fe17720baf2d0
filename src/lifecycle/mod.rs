//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build pipelines and bus → Schedule timers
//!
//! Shutdown (shutdown.rs):
//!     Signal or fatal error → Stop timers → Drain workers → Close transport
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Supervisor (supervisor.rs):
//!     Fatal runtime error → Trigger graceful shutdown → Non-zero exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then pollers, then the bus
//! - Shutdown has timeout: in-flight work is aborted after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use startup::{start, Services, StartupError};
pub use supervisor::{Fatal, Supervisor};
