//! Failure classification.
//!
//! Every error a wrapped operation can produce carries a [`FailureKind`] tag.
//! Breakers match that tag against the set of kinds they were configured to
//! handle; nothing dispatches on concrete error types.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Closed set of failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The operation did not finish before its deadline.
    Timeout,
    /// The remote endpoint could not be reached.
    Connect,
    /// Any other transport level I/O failure.
    Io,
    /// The remote answered with an unsuccessful status.
    Status,
    /// The response or message could not be decoded.
    Decode,
    /// A message consumer rejected a message.
    Consumer,
    /// A circuit breaker refused or aborted the call.
    CircuitOpen,
    /// Programming or configuration error. Never counted by default.
    Internal,
}

impl FailureKind {
    /// The I/O family: everything a flaky network device can produce.
    pub const IO_CLASS: [FailureKind; 5] = [
        FailureKind::Timeout,
        FailureKind::Connect,
        FailureKind::Io,
        FailureKind::Status,
        FailureKind::Decode,
    ];

    /// Every kind, for breakers that count any failure.
    pub const ALL: [FailureKind; 8] = [
        FailureKind::Timeout,
        FailureKind::Connect,
        FailureKind::Io,
        FailureKind::Status,
        FailureKind::Decode,
        FailureKind::Consumer,
        FailureKind::CircuitOpen,
        FailureKind::Internal,
    ];

    /// Whether this kind belongs to the I/O family.
    pub fn is_io_class(self) -> bool {
        Self::IO_CLASS.contains(&self)
    }

    /// The I/O family as a set.
    pub fn io_class() -> HashSet<FailureKind> {
        Self::IO_CLASS.into_iter().collect()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connect => "connect",
            FailureKind::Io => "io",
            FailureKind::Status => "status",
            FailureKind::Decode => "decode",
            FailureKind::Consumer => "consumer",
            FailureKind::CircuitOpen => "circuit open",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Anything that can report its failure kind.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// A classified failure from a fetch, transport call or consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Io, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Decode, message)
    }

    pub fn consumer(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Consumer, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl Classify for Failure {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}
