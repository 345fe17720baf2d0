//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML file.
//! Every section has defaults so a minimal file (or none) is valid.

use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mqtt::broker::BrokerConfig;
use crate::mqtt::resilient::BusConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retries::RetryPolicy;

/// Root configuration for the monitoring service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Polling rate and shutdown behavior.
    pub scheduler: SchedulerConfig,

    /// Breaker thresholds for endpoint pollers.
    pub circuit_breaker: BreakerConfig,

    /// Outbound HTTP settings shared by all endpoints.
    pub http: HttpConfig,

    /// JSON endpoints to poll.
    pub endpoints: Vec<EndpointConfig>,

    /// MQTT bus and sensors.
    pub mqtt: MqttConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between two poll rounds of an endpoint.
    pub update_rate_secs: u64,

    /// Seconds in-flight work may take to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_rate_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn update_rate(&self) -> Duration {
        Duration::from_secs(self.update_rate_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: NonZeroU32,

    /// Consecutive half-open successes that close it again.
    pub success_threshold: NonZeroU32,

    /// Seconds an open breaker waits before letting a trial through.
    pub open_delay_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            success_threshold: NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN),
            open_delay_secs: 60,
        }
    }
}

impl BreakerConfig {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.get(),
            success_threshold: self.success_threshold.get(),
            open_delay: Duration::from_secs(self.open_delay_secs),
        }
    }
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline of one request attempt in seconds.
    pub timeout_secs: u64,

    /// Retries after the first attempt.
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 2000,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

/// A JSON endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Name used in logs, breaker names and metric labels.
    pub name: String,

    /// URL to GET.
    pub url: String,

    /// Drop connectivity failures silently (device is often switched off).
    #[serde(default)]
    pub offline: bool,

    /// Daily window in which failures are expected.
    #[serde(default)]
    pub down_time: Option<DownTimeConfig>,

    /// Values to publish.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// Daily down-time window, `HH:MM` or `HH:MM:SS` local time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownTimeConfig {
    pub start: String,
    pub end: String,
}

/// A JSON pointer and the gauge it feeds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingConfig {
    pub pointer: String,
    pub metric: String,
}

/// MQTT configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Connect to the broker, subscribe sensors and run the bus timers.
    pub enabled: bool,

    /// Broker host name or address.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// MQTT client identifier.
    pub client_id: String,

    pub user: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Seconds allowed for establishing a connection.
    pub timeout_secs: u64,

    /// Seconds between two connection attempts after the link drops.
    pub reconnect_delay_secs: u64,

    /// Seconds without any message before a reconnect is forced.
    pub keep_alive_secs: u64,

    /// Seconds between two attempts to apply pending subscriptions.
    pub resubscribe_rate_secs: u64,

    /// Thresholds of the connectivity and topic breakers.
    pub circuit_breaker: BreakerConfig,

    /// Sensors publishing JSON payloads.
    pub sensors: Vec<SensorConfig>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ha-monitoring".to_string(),
            user: None,
            password: None,
            timeout_secs: 10,
            reconnect_delay_secs: 5,
            keep_alive_secs: 300,
            resubscribe_rate_secs: 10,
            circuit_breaker: BreakerConfig::default(),
            sensors: Vec::new(),
        }
    }
}

impl MqttConfig {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            breaker: self.circuit_breaker.to_breaker_config(),
        }
    }

    pub fn resubscribe_rate(&self) -> Duration {
        Duration::from_secs(self.resubscribe_rate_secs)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            retry_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }
}

/// An MQTT sensor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    /// Gauge name prefix.
    pub name: String,

    /// Topic to subscribe; defaults to the name.
    #[serde(default)]
    pub topic: Option<String>,

    /// JSON pointers of the values to publish.
    #[serde(default)]
    pub metrics: Vec<String>,
}

impl SensorConfig {
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: MonitoringConfig = toml::from_str("").unwrap();

        assert_eq!(config.scheduler.update_rate(), Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.failure_threshold.get(), 5);
        assert!(!config.mqtt.enabled);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config: MonitoringConfig = toml::from_str(
            r#"
            [scheduler]
            update_rate_secs = 30

            [circuit_breaker]
            failure_threshold = 3
            success_threshold = 1
            open_delay_secs = 120

            [[endpoints]]
            name = "battery"
            url = "http://192.168.1.20/api/v2/status"
            down_time = { start = "23:55", end = "23:59" }
            mappings = [{ pointer = "/USOC", metric = "battery_charge" }]

            [mqtt]
            enabled = true
            keep_alive_secs = 120

            [[mqtt.sensors]]
            name = "kitchen"
            topic = "zigbee2mqtt/kitchen"
            metrics = ["/temperature", "/humidity"]
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.to_breaker_config().open_delay, Duration::from_secs(120));
        assert_eq!(config.endpoints[0].mappings[0].metric, "battery_charge");
        assert_eq!(config.endpoints[0].down_time.as_ref().unwrap().end, "23:59");
        assert_eq!(config.mqtt.bus_config().keep_alive, Duration::from_secs(120));
        assert_eq!(config.mqtt.sensors[0].topic(), "zigbee2mqtt/kitchen");
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let parsed: Result<MonitoringConfig, _> =
            toml::from_str("[circuit_breaker]\nfailure_threshold = 0");
        assert!(parsed.is_err());
    }
}
