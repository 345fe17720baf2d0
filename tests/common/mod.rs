//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ha_monitoring::mqtt::{Handler, ReconnectCallback, Transport, TransportFuture};
use ha_monitoring::polling::{PollError, PollFuture, Poller};
use ha_monitoring::resilience::Failure;

/// In-memory broker connection that can be made to fail and to reconnect.
#[derive(Default)]
pub struct MemoryTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    on_reconnect: Mutex<Option<ReconnectCallback>>,
    failing: AtomicBool,
    subscribe_log: Mutex<Vec<String>>,
    reconnects: AtomicU32,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Deliver `payload` to the topic's handler. Returns false if nobody is subscribed.
    pub async fn publish(&self, topic: &str, payload: &str) -> bool {
        let handler = self.handlers.lock().unwrap().get(topic).cloned();
        match handler {
            Some(handler) => {
                handler(payload.to_string()).await;
                true
            }
            None => false,
        }
    }

    /// Drop all broker-side subscriptions and signal a reconnect.
    pub async fn simulate_reconnect(&self) {
        self.handlers.lock().unwrap().clear();
        let callback = self.on_reconnect.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    /// Every subscribe call that reached the broker, in order.
    pub fn subscribe_log(&self) -> Vec<String> {
        self.subscribe_log.lock().unwrap().clone()
    }

    pub fn active_topics(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(&self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> TransportFuture<'_> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Failure::connect("broker unreachable"));
            }
            self.subscribe_log.lock().unwrap().push(topic.clone());
            self.handlers.lock().unwrap().insert(topic, handler);
            Ok(())
        })
    }

    fn reconnect(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn on_reconnect(&self, callback: ReconnectCallback) {
        *self.on_reconnect.lock().unwrap() = Some(callback);
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Poller returning scripted results, then `Ok(())` once the script is exhausted.
pub struct ScriptedPoller {
    name: String,
    script: Mutex<Vec<Result<(), Failure>>>,
    calls: AtomicU32,
}

impl ScriptedPoller {
    pub fn new(name: &str, script: Vec<Result<(), Failure>>) -> Arc<Self> {
        let mut script = script;
        script.reverse();
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        })
    }

    /// A poller that always fails with `failure`.
    pub fn failing(name: &str, failure: Failure, times: usize) -> Arc<Self> {
        Self::new(name, vec![Err(failure); times])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Poller for ScriptedPoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self) -> PollFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop().unwrap_or(Ok(()));
        Box::pin(async move { next.map_err(|failure| PollError::failure(self.name.as_str(), failure)) })
    }
}

async fn read_packet(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = socket.read_u8().await.ok()?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await.ok()?;
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; length];
    socket.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
    let length = 2 + topic.len() + payload.len();
    assert!(length < 128, "single-byte remaining length only");
    let mut packet = vec![0x30, length as u8, 0, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}

/// Minimal MQTT 3.1.1 broker on an ephemeral port.
///
/// Accepts every CONNECT, acknowledges every SUBSCRIBE and then sends the
/// `retained` messages. With `hang_up_first` the first session is dropped
/// right after its CONNACK.
pub async fn start_fake_broker(retained: Vec<(String, String)>, hang_up_first: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let retained = Arc::new(retained);
    let sessions = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let retained = Arc::clone(&retained);
            let session = sessions.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while let Some((header, body)) = read_packet(&mut socket).await {
                    let reply = match header >> 4 {
                        // CONNECT
                        1 => vec![0x20, 0x02, 0x00, 0x00],
                        // SUBSCRIBE
                        8 => {
                            let mut reply = vec![0x90, 0x03, body[0], body[1], 0x01];
                            for (topic, payload) in retained.iter() {
                                reply.extend(publish_packet(topic, payload));
                            }
                            reply
                        }
                        // PINGREQ
                        12 => vec![0xd0, 0x00],
                        // DISCONNECT
                        14 => return,
                        _ => continue,
                    };
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                    if header >> 4 == 1 && hang_up_first && session == 0 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        return;
                    }
                }
            });
        }
    });

    addr
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut request = [0u8; 1024];
                        let _ = socket.read(&mut request).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
