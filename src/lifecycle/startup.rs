//! Startup orchestration.
//!
//! # Responsibilities
//! - Build one poller pipeline per configured endpoint
//! - Build the message bus and subscribe the configured sensors
//! - Register every timer with the scheduler
//! - Tear everything down again in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The transport is passed in, so the binary and tests pick their own

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::{BreakerConfig, EndpointConfig, HttpConfig, MonitoringConfig};
use crate::config::validation::parse_down_time;
use crate::http::client::JsonClient;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::supervisor::Supervisor;
use crate::mqtt::{MqttSensor, ResilientBus, Transport};
use crate::polling::{
    CircuitBreakerPoller, DownTimePoller, HttpJsonPoller, Mapping, OfflinePoller, Pipeline,
    ScheduledPoller,
};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::failure::{Failure, FailureKind};
use crate::resilience::retries::RetryPolicy;
use crate::scheduling::{AsyncExecutor, Scheduler};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid endpoint {name}: {reason}")]
    Endpoint { name: String, reason: String },

    #[error("Failed to create HTTP client: {0}")]
    Http(Failure),
}

/// Build the poller chain for one endpoint.
///
/// ```text
/// fetch → circuit breaker → [down time] → [offline]
/// ```
pub fn build_pipeline(
    endpoint: &EndpointConfig,
    breaker: &BreakerConfig,
    client: JsonClient,
) -> Result<Pipeline, StartupError> {
    let invalid = |reason: String| StartupError::Endpoint {
        name: endpoint.name.clone(),
        reason,
    };

    let url = Url::parse(&endpoint.url).map_err(|e| invalid(e.to_string()))?;
    let mappings = endpoint
        .mappings
        .iter()
        .map(|m| Mapping::new(m.pointer.as_str(), m.metric.as_str()))
        .collect();
    let fetch = Arc::new(HttpJsonPoller::new(endpoint.name.as_str(), url, client, mappings));

    let breaker = CircuitBreaker::new(
        endpoint.name.as_str(),
        breaker.to_breaker_config(),
        FailureKind::IO_CLASS,
    );
    let mut pipeline = Pipeline::new(fetch).layer(CircuitBreakerPoller::new(breaker));

    if let Some(window) = &endpoint.down_time {
        let window = parse_down_time(window).map_err(invalid)?;
        pipeline = pipeline.layer(DownTimePoller::new(window));
    }
    if endpoint.offline {
        pipeline = pipeline.layer(OfflinePoller::new());
    }
    Ok(pipeline)
}

/// HTTP clients shared by all endpoints.
///
/// Offline endpoints are expected to be unreachable much of the time, so
/// their client never retries.
#[derive(Debug, Clone)]
pub struct HttpClients {
    online: JsonClient,
    offline: JsonClient,
}

impl HttpClients {
    pub fn new(config: &HttpConfig) -> Result<Self, StartupError> {
        Ok(Self {
            online: JsonClient::new(config.timeout(), config.retry_policy())
                .map_err(StartupError::Http)?,
            offline: JsonClient::new(config.timeout(), RetryPolicy::none())
                .map_err(StartupError::Http)?,
        })
    }

    pub fn for_endpoint(&self, endpoint: &EndpointConfig) -> JsonClient {
        if endpoint.offline {
            self.offline.clone()
        } else {
            self.online.clone()
        }
    }
}

/// Everything started by [`start`].
pub struct Services {
    pub scheduler: Scheduler,
    pub executor: AsyncExecutor,
    pub pollers: Vec<ScheduledPoller>,
    pub bus: Option<ResilientBus<Arc<dyn Transport>>>,
}

/// Build and schedule all pollers and, when enabled, the message bus.
pub async fn start(
    config: &MonitoringConfig,
    transport: Arc<dyn Transport>,
    shutdown: &Shutdown,
    supervisor: Supervisor,
) -> Result<Services, StartupError> {
    let executor = AsyncExecutor::new();
    let scheduler = Scheduler::new(shutdown, supervisor);

    let clients = HttpClients::new(&config.http)?;

    let mut pollers = Vec::with_capacity(config.endpoints.len());
    for endpoint in &config.endpoints {
        let pipeline =
            build_pipeline(endpoint, &config.circuit_breaker, clients.for_endpoint(endpoint))?;
        let poller = ScheduledPoller::new(Arc::new(pipeline), executor.clone());
        poller.schedule(&scheduler, config.scheduler.update_rate());
        pollers.push(poller);
    }

    let bus = if config.mqtt.enabled {
        if let Err(e) = transport.connect().await {
            tracing::warn!(error = %e, "Initial MQTT connect failed, subscriptions stay pending");
        }
        let bus = ResilientBus::new(transport, config.mqtt.bus_config());
        let breaker = config.mqtt.circuit_breaker.to_breaker_config();
        for sensor in &config.mqtt.sensors {
            let sensor = Arc::new(MqttSensor::new(
                sensor.name.as_str(),
                sensor.topic(),
                &sensor.metrics,
                breaker.clone(),
            ));
            sensor.subscribe(&bus).await;
        }
        bus.schedule(&scheduler, config.mqtt.resubscribe_rate());
        Some(bus)
    } else {
        tracing::warn!("MQTT is disabled");
        None
    };

    tracing::info!(
        endpoints = pollers.len(),
        timers = scheduler.timer_count(),
        "Monitoring started"
    );

    Ok(Services {
        scheduler,
        executor,
        pollers,
        bus,
    })
}

impl Services {
    /// Stop timers, drain in-flight work within `grace`, close the transport.
    pub async fn stop(self, shutdown: &Shutdown, grace: Duration) {
        shutdown.trigger();
        self.scheduler.join(grace).await;
        self.executor.shutdown(grace).await;

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.close().await {
                tracing::warn!(error = %e, "Failed to close MQTT transport");
            }
        }
        tracing::info!("Monitoring stopped");
    }
}
