//! JSON-over-HTTP client for device endpoints.
//!
//! # Responsibilities
//! - GET a URL and decode the body as JSON
//! - Put a deadline on every attempt
//! - Retry transient failures with jittered backoff
//! - Classify every error into a [`FailureKind`]

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::resilience::failure::{Failure, FailureKind};
use crate::resilience::retries::{retry_with_backoff, RetryPolicy};
use crate::resilience::timeouts::with_timeout;

/// Shared HTTP client with per-attempt deadline and retry policy.
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl JsonClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, Failure> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| Failure::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            retry,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// GET `url` and decode the response body as JSON.
    pub async fn get_json(&self, url: &Url) -> Result<Value, Failure> {
        retry_with_backoff(&self.retry, url.as_str(), || {
            with_timeout(url.as_str(), self.timeout, self.fetch_once(url))
        })
        .await
    }

    async fn fetch_once(&self, url: &Url) -> Result<Value, Failure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;

        response.json::<Value>().await.map_err(classify)
    }
}

/// Map a reqwest error onto the failure taxonomy.
pub fn classify(err: reqwest::Error) -> Failure {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::Connect
    } else if err.is_status() {
        FailureKind::Status
    } else if err.is_decode() {
        FailureKind::Decode
    } else if err.is_builder() {
        FailureKind::Internal
    } else {
        FailureKind::Io
    };
    Failure::new(kind, err.to_string())
}
