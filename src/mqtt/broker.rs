//! MQTT broker connection built on `rumqttc`.
//!
//! # Data Flow
//! ```text
//! connect → spawn event loop task → wait for the first ConnAck
//!
//! event loop:
//!     ConnAck (first)  → connected
//!     ConnAck (later)  → connected, on_reconnect callback
//!     Publish          → handlers whose filter matches the topic
//!     error            → disconnected, poll again after retry_delay
//!                        (rumqttc reconnects on the next poll)
//!
//! reconnect → fresh client and event loop → wait for ConnAck
//! ```
//!
//! # Design Decisions
//! - Subscribing while disconnected fails instead of queueing inside the
//!   client, so the bus keeps the subscription pending
//! - Handlers run on the event loop task, one message at a time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::mqtt::transport::{Handler, ReconnectCallback, Transport, TransportFuture};
use crate::resilience::failure::Failure;

const REQUEST_CAPACITY: usize = 64;
const PROTOCOL_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Broker address and session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Deadline for establishing a connection.
    pub timeout: Duration,
    /// Pause between two connection attempts of the event loop.
    pub retry_delay: Duration,
}

impl BrokerConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.as_str(), self.host.as_str(), self.port);
        options.set_keep_alive(PROTOCOL_KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(user) = &self.user {
            options.set_credentials(user.as_str(), self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

struct Shared {
    name: String,
    config: BrokerConfig,
    client: Mutex<AsyncClient>,
    idle: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    connected: watch::Sender<bool>,
    ever_connected: AtomicBool,
    closing: AtomicBool,
    handlers: Mutex<Vec<(String, Handler)>>,
    on_reconnect: Mutex<Option<ReconnectCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Spawn the event loop created with the client, once.
    fn start(self: &Arc<Self>) {
        let mut driver = lock(&self.driver);
        if driver.is_some() {
            return;
        }
        if let Some(eventloop) = lock(&self.idle).take() {
            *driver = Some(tokio::spawn(drive(eventloop, Arc::clone(self))));
        }
    }

    /// Replace client and event loop with fresh ones.
    fn restart(self: &Arc<Self>) {
        let (client, eventloop) = AsyncClient::new(self.config.options(), REQUEST_CAPACITY);
        *lock(&self.client) = client;
        lock(&self.idle).take();
        self.connected.send_replace(false);

        let mut driver = lock(&self.driver);
        if let Some(previous) = driver.take() {
            previous.abort();
        }
        *driver = Some(tokio::spawn(drive(eventloop, Arc::clone(self))));
    }

    fn on_connack(&self) {
        self.connected.send_replace(true);
        if !self.ever_connected.swap(true, Ordering::AcqRel) {
            tracing::info!(broker = %self.name, "Connected to MQTT broker");
            return;
        }

        tracing::info!(broker = %self.name, "Reconnected to MQTT broker");
        let callback = lock(&self.on_reconnect).clone();
        if let Some(callback) = callback {
            tokio::spawn(callback());
        }
    }

    fn set_handler(&self, filter: &str, handler: Handler) {
        let mut handlers = lock(&self.handlers);
        handlers.retain(|(existing, _)| existing != filter);
        handlers.push((filter.to_string(), handler));
    }

    fn handlers_for(&self, topic: &str) -> Vec<Handler> {
        lock(&self.handlers)
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

async fn drive(mut eventloop: EventLoop, shared: Arc<Shared>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => shared.on_connack(),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                for handler in shared.handlers_for(&publish.topic) {
                    handler(payload.clone()).await;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if shared.is_closing() => break,
            Ok(_) => {}
            Err(e) => {
                if shared.is_closing() {
                    break;
                }
                if shared.connected.send_replace(false) {
                    tracing::warn!(broker = %shared.name, error = %e, "Lost MQTT connection");
                } else {
                    tracing::debug!(broker = %shared.name, error = %e, "MQTT connection attempt failed");
                }
                tokio::time::sleep(shared.config.retry_delay).await;
            }
        }
    }
    tracing::debug!(broker = %shared.name, "MQTT event loop stopped");
}

/// Whether `topic` matches the subscription `filter` (`+` and `#` wildcards).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            part => {
                if levels.next() != Some(part) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

/// [`Transport`] talking to a real MQTT broker.
pub struct MqttTransport {
    shared: Arc<Shared>,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        let name = format!("mqtt://{}:{}", config.host, config.port);
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        let (connected, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                name,
                config,
                client: Mutex::new(client),
                idle: Mutex::new(Some(eventloop)),
                driver: Mutex::new(None),
                connected,
                ever_connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                handlers: Mutex::new(Vec::new()),
                on_reconnect: Mutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    async fn await_connection(&self) -> Result<(), Failure> {
        let mut connected = self.shared.connected.subscribe();
        let timeout = self.shared.config.timeout;
        let outcome = tokio::time::timeout(timeout, connected.wait_for(|up| *up))
            .await
            .map(|result| result.is_ok());

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(Failure::connect(format!(
                "{}: event loop stopped",
                self.shared.name
            ))),
            Err(_) => Err(Failure::timeout(format!(
                "{}: not connected within {:?}",
                self.shared.name, timeout
            ))),
        }
    }
}

impl Transport for MqttTransport {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn connect(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            self.shared.start();
            self.await_connection().await
        })
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> TransportFuture<'_> {
        let topic = topic.to_string();
        Box::pin(async move {
            if !self.is_connected() {
                return Err(Failure::connect(format!(
                    "Couldn't subscribe to {}: not connected to {}",
                    topic, self.shared.name
                )));
            }
            self.shared.set_handler(&topic, handler);

            let client = lock(&self.shared.client).clone();
            client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| Failure::io(format!("Couldn't subscribe to {}: {}", topic, e)))
        })
    }

    fn reconnect(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            tracing::info!(broker = %self.shared.name, "Reconnecting to MQTT broker");
            self.shared.restart();
            self.await_connection().await
        })
    }

    fn on_reconnect(&self, callback: ReconnectCallback) {
        *lock(&self.shared.on_reconnect) = Some(callback);
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            self.shared.closing.store(true, Ordering::Release);
            let client = lock(&self.shared.client).clone();
            if let Err(e) = client.try_disconnect() {
                tracing::debug!(broker = %self.shared.name, error = %e, "Disconnect request failed");
            }

            let driver = lock(&self.shared.driver).take();
            if let Some(mut driver) = driver {
                if tokio::time::timeout(self.shared.config.timeout, &mut driver)
                    .await
                    .is_err()
                {
                    driver.abort();
                }
            }
            self.shared.connected.send_replace(false);
            tracing::info!(broker = %self.shared.name, "Closed MQTT connection");
            Ok(())
        })
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        let driver = lock(&self.shared.driver).take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}
