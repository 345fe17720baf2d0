//! MQTT transport against a local broker: delivery and automatic reconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;

use ha_monitoring::mqtt::{
    BrokerConfig, BusConfig, Consumer, MqttTransport, ReconnectCallback, ResilientBus,
    SubscriptionStatus, Transport,
};
use ha_monitoring::resilience::CircuitBreakerConfig;

mod common;
use common::start_fake_broker;

fn broker(addr: SocketAddr) -> BrokerConfig {
    BrokerConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        client_id: "ha-monitoring-test".into(),
        user: None,
        password: None,
        timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    }
}

fn bus_config() -> BusConfig {
    BusConfig {
        keep_alive: Duration::from_secs(300),
        breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 1,
            open_delay: Duration::from_secs(60),
        },
    }
}

#[tokio::test]
async fn test_bus_receives_broker_messages() {
    let addr = start_fake_broker(
        vec![("zigbee2mqtt/kitchen".into(), r#"{"temperature":21.5}"#.into())],
        false,
    )
    .await;
    let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new(broker(addr)));
    transport.connect().await.unwrap();

    let bus = ResilientBus::new(Arc::clone(&transport), bus_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer: Consumer = Arc::new(move |payload: String| {
        let _ = tx.send(payload);
        async { Ok(()) }.boxed()
    });
    bus.subscribe("zigbee2mqtt/+", consumer).await;
    assert_eq!(bus.status("zigbee2mqtt/+"), Some(SubscriptionStatus::Active));

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, r#"{"temperature":21.5}"#);
    assert!(bus.silence() < Duration::from_secs(5));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_session_triggers_reconnect_callback() {
    let addr = start_fake_broker(Vec::new(), true).await;
    let transport = MqttTransport::new(broker(addr));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: ReconnectCallback = Arc::new(move || {
        let _ = tx.send(());
        async {}.boxed()
    });
    transport.on_reconnect(callback);

    transport.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(transport.is_connected());

    transport.close().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_explicit_reconnect_opens_new_session() {
    let addr = start_fake_broker(Vec::new(), false).await;
    let transport = MqttTransport::new(broker(addr));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: ReconnectCallback = Arc::new(move || {
        let _ = tx.send(());
        async {}.boxed()
    });
    transport.on_reconnect(callback);

    transport.connect().await.unwrap();
    assert!(rx.try_recv().is_err());

    transport.reconnect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    transport.close().await.unwrap();
}
