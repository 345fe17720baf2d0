//! Home automation monitoring: polls unreliable devices and republishes their
//! state as metrics.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mqtt;
pub mod observability;
pub mod polling;
pub mod resilience;
pub mod scheduling;

pub use config::MonitoringConfig;
pub use lifecycle::Shutdown;
pub use resilience::CircuitBreaker;
