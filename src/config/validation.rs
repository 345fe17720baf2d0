//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, down-time start before end)
//! - Validate URLs, JSON pointers and the metrics address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MonitoringConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use chrono::NaiveTime;
use url::Url;

use crate::config::schema::{DownTimeConfig, MonitoringConfig};
use crate::polling::down_time::DownTime;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check everything serde cannot.
pub fn validate_config(config: &MonitoringConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_secs(&mut errors, "scheduler.update_rate_secs", config.scheduler.update_rate_secs, false);
    check_secs(&mut errors, "scheduler.shutdown_grace_secs", config.scheduler.shutdown_grace_secs, true);
    check_secs(&mut errors, "circuit_breaker.open_delay_secs", config.circuit_breaker.open_delay_secs, true);
    check_secs(&mut errors, "http.timeout_secs", config.http.timeout_secs, false);
    if config.http.max_delay_ms / 1000 > MAX_SECS {
        errors.push(ValidationError::new(
            "http.max_delay_ms",
            format!("must not exceed {} ms", MAX_SECS * 1000),
        ));
    }
    if config.http.base_delay_ms > config.http.max_delay_ms {
        errors.push(ValidationError::new(
            "http.base_delay_ms",
            "must not exceed http.max_delay_ms",
        ));
    }

    let mut names = HashSet::new();
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let field = format!("endpoints[{}]", i);

        if endpoint.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !names.insert(endpoint.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate endpoint name '{}'", endpoint.name),
            ));
        }

        if let Err(e) = Url::parse(&endpoint.url) {
            errors.push(ValidationError::new(
                format!("{}.url", field),
                format!("invalid URL '{}': {}", endpoint.url, e),
            ));
        }

        if let Some(window) = &endpoint.down_time {
            if let Err(e) = parse_down_time(window) {
                errors.push(ValidationError::new(format!("{}.down_time", field), e));
            }
        }

        for (j, mapping) in endpoint.mappings.iter().enumerate() {
            if !is_pointer(&mapping.pointer) {
                errors.push(ValidationError::new(
                    format!("{}.mappings[{}].pointer", field, j),
                    format!("'{}' is not a JSON pointer", mapping.pointer),
                ));
            }
            if mapping.metric.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.mappings[{}].metric", field, j),
                    "must not be empty",
                ));
            }
        }
    }

    if config.mqtt.enabled {
        let mqtt = &config.mqtt;
        check_secs(&mut errors, "mqtt.keep_alive_secs", mqtt.keep_alive_secs, false);
        check_secs(&mut errors, "mqtt.resubscribe_rate_secs", mqtt.resubscribe_rate_secs, false);
        check_secs(&mut errors, "mqtt.timeout_secs", mqtt.timeout_secs, false);
        check_secs(&mut errors, "mqtt.reconnect_delay_secs", mqtt.reconnect_delay_secs, true);
        check_secs(
            &mut errors,
            "mqtt.circuit_breaker.open_delay_secs",
            mqtt.circuit_breaker.open_delay_secs,
            true,
        );
        if mqtt.host.trim().is_empty() {
            errors.push(ValidationError::new("mqtt.host", "must not be empty"));
        }
        if mqtt.port == 0 {
            errors.push(ValidationError::new("mqtt.port", "must be greater than 0"));
        }
        if mqtt.client_id.is_empty() || mqtt.client_id.starts_with(' ') {
            errors.push(ValidationError::new(
                "mqtt.client_id",
                "must not be empty or start with a space",
            ));
        }
        if mqtt.password.is_some() && mqtt.user.is_none() {
            errors.push(ValidationError::new("mqtt.password", "requires mqtt.user"));
        }
    }
    for (i, sensor) in config.mqtt.sensors.iter().enumerate() {
        if sensor.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("mqtt.sensors[{}].name", i), "must not be empty"));
        }
        for pointer in &sensor.metrics {
            if !is_pointer(pointer) {
                errors.push(ValidationError::new(
                    format!("mqtt.sensors[{}].metrics", i),
                    format!("'{}' is not a JSON pointer", pointer),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Upper bound of every configured period: one week.
pub const MAX_SECS: u64 = 7 * 24 * 60 * 60;

fn check_secs(errors: &mut Vec<ValidationError>, field: &str, value: u64, allow_zero: bool) {
    if value == 0 && !allow_zero {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    } else if value > MAX_SECS {
        errors.push(ValidationError::new(field, format!("must not exceed {} seconds", MAX_SECS)));
    }
}

fn is_pointer(pointer: &str) -> bool {
    pointer.len() > 1 && pointer.starts_with('/')
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| format!("'{}' is not a time of day (HH:MM or HH:MM:SS)", value))
}

/// Parse a configured window.
pub fn parse_down_time(window: &DownTimeConfig) -> Result<DownTime, String> {
    let start = parse_time(&window.start)?;
    let end = parse_time(&window.end)?;
    DownTime::new(start, end).map_err(|e| e.to_string())
}
