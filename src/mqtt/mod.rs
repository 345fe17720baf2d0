//! MQTT subsystem.
//!
//! # Data Flow
//! ```text
//! Transport (transport.rs, broker.rs over rumqttc)
//!     → ResilientBus (resilient.rs): subscriptions, resubscription, keep-alive
//!     → MqttSensor (sensor.rs): payload → SafeJsonMapper → gauges
//! ```

pub mod broker;
pub mod resilient;
pub mod sensor;
pub mod transport;

pub use broker::{BrokerConfig, MqttTransport};
pub use resilient::{BusConfig, Consumer, ResilientBus, SubscriptionStatus};
pub use sensor::{MqttSensor, SafeJsonMapper};
pub use transport::{Handler, NullTransport, ReconnectCallback, Transport, TransportFuture};
