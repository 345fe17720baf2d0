//! Generic fetch stage: read numbers out of a JSON document.

use std::fmt;

use serde_json::Value;
use url::Url;

use crate::http::client::JsonClient;
use crate::observability::metrics;
use crate::polling::error::PollError;
use crate::polling::pipeline::{PollFuture, Poller};

/// A JSON pointer and the gauge its value is published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub pointer: String,
    pub metric: String,
}

impl Mapping {
    pub fn new(pointer: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            metric: metric.into(),
        }
    }
}

/// GETs a URL and publishes one gauge per mapping.
pub struct HttpJsonPoller {
    name: String,
    url: Url,
    client: JsonClient,
    mappings: Vec<Mapping>,
}

impl HttpJsonPoller {
    pub fn new(name: impl Into<String>, url: Url, client: JsonClient, mappings: Vec<Mapping>) -> Self {
        Self {
            name: name.into(),
            url,
            client,
            mappings,
        }
    }

    async fn poll(&self) -> Result<(), PollError> {
        let document = self
            .client
            .get_json(&self.url)
            .await
            .map_err(|failure| PollError::failure(&self.name, failure))?;

        for mapping in &self.mappings {
            let value = read_number(&document, &mapping.pointer);
            tracing::trace!(metric = %mapping.metric, value = value, "Update");
            metrics::record_value(&mapping.metric, value);
        }
        Ok(())
    }
}

impl fmt::Display for HttpJsonPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.url)
    }
}

impl Poller for HttpJsonPoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self) -> PollFuture<'_> {
        Box::pin(self.poll())
    }
}

/// Number at `pointer`; missing or non-numeric values read as 0.
///
/// Numeric strings and booleans are accepted.
pub fn read_number(document: &Value, pointer: &str) -> f64 {
    match document.pointer(pointer) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        _ => 0.0,
    }
}
