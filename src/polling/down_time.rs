//! Tolerance for a known daily device down-time.

use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveTime};
use thiserror::Error;

use crate::polling::pipeline::{Layer, Next, PollFuture};

/// Raised when a window does not start before it ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Start {start} must be before end {end}")]
pub struct DownTimeError {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A daily window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownTime {
    start: NaiveTime,
    end: NaiveTime,
}

impl DownTime {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, DownTimeError> {
        if start >= end {
            return Err(DownTimeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

impl fmt::Display for DownTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Wall clock used to place a failure relative to the window.
pub type Clock = Arc<dyn Fn() -> NaiveTime + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().time())
}

/// Swallows any failure that happens inside the down-time window.
pub struct DownTimePoller {
    window: DownTime,
    clock: Clock,
}

impl DownTimePoller {
    pub fn new(window: DownTime) -> Self {
        Self::with_clock(window, local_clock())
    }

    pub fn with_clock(window: DownTime, clock: Clock) -> Self {
        tracing::info!(down_time = %window, "Configured poller with down time");
        Self { window, clock }
    }

    pub fn window(&self) -> DownTime {
        self.window
    }
}

impl Layer for DownTimePoller {
    fn handle<'a>(&'a self, next: Next<'a>) -> PollFuture<'a> {
        Box::pin(async move {
            match next.run().await {
                Err(err) if self.window.contains((self.clock)()) => {
                    tracing::debug!(
                        target_name = %next.target(),
                        down_time = %self.window,
                        error = %err,
                        "Not available within daily down time"
                    );
                    Ok(())
                }
                result => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let window = DownTime::new(at(8, 0), at(9, 0)).unwrap();

        assert!(window.contains(at(8, 0)));
        assert!(window.contains(at(8, 59)));
        assert!(!window.contains(at(9, 0)));
        assert!(!window.contains(at(7, 59)));
    }

    #[test]
    fn test_start_must_precede_end() {
        assert_eq!(
            DownTime::new(at(9, 0), at(8, 0)),
            Err(DownTimeError {
                start: at(9, 0),
                end: at(8, 0)
            })
        );
        assert!(DownTime::new(at(8, 0), at(8, 0)).is_err());
    }

    #[test]
    fn test_display() {
        let window = DownTime::new(at(8, 0), at(9, 30)).unwrap();
        assert_eq!(window.to_string(), "08:00:00 - 09:30:00");
    }
}
