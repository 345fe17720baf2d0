//! Pub/sub transport seam.
//!
//! A transport delivers payloads for subscribed topics, can be asked to
//! reconnect, and tells its owner when it reconnected on its own. Broker
//! clients implement [`Transport`]; [`NullTransport`] stands in when MQTT is
//! disabled.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::resilience::failure::Failure;

/// Receives every payload published on a subscribed topic.
pub type Handler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Called by the transport after it re-established its connection.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub type TransportFuture<'a> = BoxFuture<'a, Result<(), Failure>>;

/// Reconnect-capable pub/sub client.
pub trait Transport: Send + Sync {
    /// Identity used to name the connectivity breaker.
    fn name(&self) -> &str;

    fn connect(&self) -> TransportFuture<'_>;

    fn subscribe(&self, topic: &str, handler: Handler) -> TransportFuture<'_>;

    fn reconnect(&self) -> TransportFuture<'_>;

    /// Register the callback for transport-initiated reconnects.
    fn on_reconnect(&self, callback: ReconnectCallback);

    fn close(&self) -> TransportFuture<'_>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&self) -> TransportFuture<'_> {
        (**self).connect()
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> TransportFuture<'_> {
        (**self).subscribe(topic, handler)
    }

    fn reconnect(&self) -> TransportFuture<'_> {
        (**self).reconnect()
    }

    fn on_reconnect(&self, callback: ReconnectCallback) {
        (**self).on_reconnect(callback)
    }

    fn close(&self) -> TransportFuture<'_> {
        (**self).close()
    }
}

/// Transport that accepts everything and never delivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NullTransport {
    fn name(&self) -> &str {
        "mqtt-null"
    }

    fn connect(&self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn subscribe(&self, topic: &str, _handler: Handler) -> TransportFuture<'_> {
        tracing::debug!(topic = %topic, "Ignoring subscription on null transport");
        Box::pin(async { Ok(()) })
    }

    fn reconnect(&self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn on_reconnect(&self, _callback: ReconnectCallback) {}

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[tokio::test]
    async fn test_null_transport_accepts_everything() {
        let transport = Arc::new(NullTransport::new());
        let handler: Handler = Arc::new(|_| async {}.boxed());

        assert!(transport.connect().await.is_ok());
        assert!(transport.subscribe("sensors/kitchen", handler).await.is_ok());
        assert!(transport.reconnect().await.is_ok());
        transport.on_reconnect(Arc::new(|| async {}.boxed()));
        assert!(transport.close().await.is_ok());
        assert_eq!(transport.name(), "mqtt-null");
    }
}
