//! Single channel for fatal runtime errors.
//!
//! Background timers do not decide to exit the process on their own. They
//! report to the [`Supervisor`], and `main` turns the first report into an
//! orderly shutdown and a non-zero exit code.

use tokio::sync::mpsc;

use thiserror::Error;

/// An error the process cannot continue after.
#[derive(Debug, Error)]
pub enum Fatal {
    #[error("Timer {name} stopped unexpectedly: {reason}")]
    TimerStopped { name: String, reason: String },

    #[error("Metrics exporter failed: {0}")]
    Metrics(String),
}

/// Sender side of the fatal error channel.
#[derive(Debug, Clone)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<Fatal>,
}

impl Supervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fatal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn fatal(&self, fatal: Fatal) {
        tracing::error!(error = %fatal, "Fatal error");
        let _ = self.tx.send(fatal);
    }
}
