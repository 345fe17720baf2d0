//! Polling subsystem.
//!
//! # Data Flow
//! ```text
//! Scheduler tick
//!     → scheduled.rs (dispatch to executor, classify outcome)
//!     → offline.rs (optional: drop connectivity failures)
//!     → down_time.rs (optional: drop failures inside the daily window)
//!     → breaker.rs (circuit breaker around the fetch)
//!     → json_proxy.rs (fetch, extract, publish gauges)
//! ```
//!
//! # Design Decisions
//! - Layers are ordered middleware; each takes the rest of the chain as `Next`
//! - Metrics of an endpoint simply stop advancing while it is suppressed

pub mod breaker;
pub mod down_time;
pub mod error;
pub mod json_proxy;
pub mod offline;
pub mod pipeline;
pub mod scheduled;

pub use breaker::CircuitBreakerPoller;
pub use down_time::{DownTime, DownTimeError, DownTimePoller};
pub use error::PollError;
pub use json_proxy::{HttpJsonPoller, Mapping};
pub use offline::OfflinePoller;
pub use pipeline::{Layer, Next, Pipeline, PollFuture, Poller};
pub use scheduled::ScheduledPoller;
