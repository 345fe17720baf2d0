//! Home automation monitoring service.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                         MONITORING                              │
//!   │                                                                 │
//!   │  Scheduler ──tick──▶ ScheduledPoller ──▶ AsyncExecutor worker   │
//!   │                                              │                  │
//!   │                       [offline] [down time] breaker ──▶ fetch ──┼──▶ Device (HTTP/JSON)
//!   │                                                                 │
//!   │  Transport ──msg──▶ ResilientBus ──▶ topic breaker ──▶ sensor ──┼──▶ gauges
//!   │      ▲                  │                                       │
//!   │      └── reconnect ─────┘ keep-alive / resubscribe timers       │
//!   │                                                                 │
//!   │  Cross-cutting: config · resilience · observability · lifecycle │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ha_monitoring::config::load_config;
use ha_monitoring::lifecycle::signals::shutdown_signal;
use ha_monitoring::lifecycle::{start, Fatal, Shutdown, Supervisor};
use ha_monitoring::mqtt::{MqttTransport, NullTransport, Transport};
use ha_monitoring::observability::logging::init_logging;
use ha_monitoring::observability::metrics::init_metrics;

#[derive(Debug, Parser)]
#[command(name = "ha-monitoring", version, about = "Polls home automation devices into metrics")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "monitoring.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    init_logging(&config.observability.log_level)?;
    tracing::info!(config = %args.config.display(), "ha-monitoring v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let (supervisor, mut fatal) = Supervisor::new();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    supervisor.fatal(Fatal::Metrics(e.to_string()));
                }
            }
            Err(_) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                );
            }
        }
    }

    let transport: Arc<dyn Transport> = if config.mqtt.enabled {
        Arc::new(MqttTransport::new(config.mqtt.broker_config()))
    } else {
        Arc::new(NullTransport::new())
    };

    let services = start(&config, transport, &shutdown, supervisor).await?;

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        fatal = fatal.recv() => fatal,
    };

    tracing::info!("Shutting down");
    services
        .stop(&shutdown, config.scheduler.shutdown_grace())
        .await;

    match failure {
        Some(fatal) => Err(fatal.into()),
        None => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
    }
}
