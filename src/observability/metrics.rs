//! Metrics collection and exposition.
//!
//! # Metrics
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half open, 2=open, by breaker
//! - `poll_total` (counter): poll outcomes by target and outcome
//! - `bus_pending_subscriptions` (gauge): subscriptions waiting to be applied
//! - `bus_messages_total` (counter): messages received by topic
//!
//! Endpoint and sensor values are published as gauges under their configured
//! names by the pollers that read them.
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so library code and
//!   tests never need to install one
//! - The Prometheus exporter serves its own HTTP listener

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;

use crate::resilience::circuit_breaker::State;

/// Errors from metrics setup.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_gauge!(
        "circuit_breaker_state",
        "Circuit breaker state: 0=closed, 1=half open, 2=open"
    );
    describe_counter!("poll_total", "Poll outcomes by target and outcome");
    describe_gauge!(
        "bus_pending_subscriptions",
        "Subscriptions waiting to be applied to the transport"
    );
    describe_counter!("bus_messages_total", "Messages received by topic");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn state_value(state: State) -> f64 {
    match state {
        State::Closed => 0.0,
        State::HalfOpen => 1.0,
        State::Open => 2.0,
    }
}

pub fn record_breaker_state(breaker: &str, state: State) {
    gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(state_value(state));
}

/// Outcome label of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ok,
    Failed,
    Suppressed,
    Rejected,
}

impl PollOutcome {
    fn as_str(self) -> &'static str {
        match self {
            PollOutcome::Ok => "ok",
            PollOutcome::Failed => "failed",
            PollOutcome::Suppressed => "suppressed",
            PollOutcome::Rejected => "rejected",
        }
    }
}

pub fn record_poll(target: &str, outcome: PollOutcome) {
    counter!(
        "poll_total",
        "target" => target.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_pending_subscriptions(pending: usize) {
    gauge!("bus_pending_subscriptions").set(pending as f64);
}

pub fn record_message(topic: &str) {
    counter!("bus_messages_total", "topic" => topic.to_string()).increment(1);
}

/// Publish a sampled value under its configured gauge name.
pub fn record_value(name: &str, value: f64) {
    gauge!(name.to_string()).set(value);
}
