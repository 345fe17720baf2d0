//! Polling for endpoints that are expected to go offline.

use crate::polling::error::PollError;
use crate::polling::pipeline::{Layer, Next, PollFuture};
use crate::resilience::failure::Classify;

/// Silently drops connectivity failures and breaker rejections.
///
/// Anything else (bad configuration, internal errors) still propagates.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflinePoller;

impl OfflinePoller {
    pub fn new() -> Self {
        Self
    }
}

fn is_offline(err: &PollError) -> bool {
    err.signal().is_some() || err.failure_kind().is_io_class()
}

impl Layer for OfflinePoller {
    fn handle<'a>(&'a self, next: Next<'a>) -> PollFuture<'a> {
        Box::pin(async move {
            match next.run().await {
                Err(err) if is_offline(&err) => Ok(()),
                result => result,
            }
        })
    }
}
