//! Sensors publishing JSON over MQTT.

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::Level;

use crate::mqtt::resilient::ResilientBus;
use crate::mqtt::transport::Transport;
use crate::observability::metrics;
use crate::polling::json_proxy::{read_number, Mapping};
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::failure::{Failure, FailureKind};

/// Parses payloads, repairing the `nan` literals some firmware emits.
///
/// A payload that fails to parse is repaired and parsed again. Failures go
/// through a breaker so a device that always sends broken JSON is reported
/// once instead of on every message.
pub struct SafeJsonMapper {
    breaker: CircuitBreaker,
}

impl SafeJsonMapper {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, config, FailureKind::ALL),
        }
    }

    pub async fn map(&self, message: &str) -> Result<Value, Failure> {
        let err = match self.breaker.get(|| async { parse(message) }).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let repaired = repair(message);
        let value = parse(&repaired)?;
        match repair_level(&err) {
            Some(level) if level == Level::INFO => {
                tracing::info!("Message was repaired: circuit breaker opened");
            }
            Some(_) => {
                tracing::warn!(
                    message = %message,
                    repaired = %repaired,
                    error = %err,
                    "Message was repaired"
                );
            }
            None => {}
        }
        Ok(value)
    }
}

/// How loudly a repair is reported; silent while the breaker is open or reopening.
fn repair_level<E>(err: &BreakerError<E>) -> Option<Level> {
    match err {
        BreakerError::JustOpened { .. } => Some(Level::INFO),
        BreakerError::Open { .. } | BreakerError::HalfOpenFailed { .. } => None,
        BreakerError::Inner(_) => Some(Level::WARN),
    }
}

fn parse(message: &str) -> Result<Value, Failure> {
    serde_json::from_str(message).map_err(|e| Failure::decode(e.to_string()))
}

fn repair(message: &str) -> String {
    message.replace(": nan", ": null")
}

/// Gauge name for a sensor value: `<sensor>_<pointer without leading slash and dots>`.
pub fn gauge_name(sensor: &str, pointer: &str) -> String {
    let path = pointer.strip_prefix('/').unwrap_or(pointer);
    format!("{}_{}", sensor, path.replace('.', ""))
}

/// One MQTT topic whose JSON payload feeds a set of gauges.
pub struct MqttSensor {
    name: String,
    topic: String,
    mappings: Vec<Mapping>,
    mapper: SafeJsonMapper,
}

impl MqttSensor {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        pointers: &[String],
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let name = name.into();
        let mappings = pointers
            .iter()
            .map(|pointer| Mapping::new(pointer.as_str(), gauge_name(&name, pointer)))
            .collect();
        let mapper = SafeJsonMapper::new(format!("{}-json-mapper", name), breaker);

        Self {
            topic: topic.into(),
            name,
            mappings,
            mapper,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Map one payload and publish its values.
    pub async fn consume(&self, payload: &str) -> Result<(), Failure> {
        let document = self.mapper.map(payload).await?;
        for mapping in &self.mappings {
            metrics::record_value(&mapping.metric, read_number(&document, &mapping.pointer));
        }
        Ok(())
    }

    /// Subscribe this sensor's topic on `bus`.
    pub async fn subscribe<T: Transport + 'static>(self: Arc<Self>, bus: &ResilientBus<T>) {
        let topic = self.topic.clone();
        bus.subscribe(
            topic,
            Arc::new(move |payload: String| {
                let sensor = Arc::clone(&self);
                async move { sensor.consume(&payload).await }.boxed()
            }),
        )
        .await;
    }
}
