//! Default reporting of open family breaker errors.
//!
//! Callers that have nothing better to do with a breaker outcome hand it to
//! [`log_breaker_error`]: the open family is logged and swallowed, the
//! operation's own error comes back to the caller.

use std::fmt::Display;

use crate::resilience::circuit_breaker::BreakerError;

/// Log the open family and return only [`BreakerError::Inner`] errors.
///
/// - `JustOpened` and `HalfOpenFailed` log at warn with the time until the
///   next trial and the cause
/// - `Open` logs at debug; it repeats on every rejected call
pub fn log_breaker_error<E: Display>(context: &str, err: BreakerError<E>) -> Result<(), E> {
    match err {
        BreakerError::JustOpened {
            breaker,
            remaining,
            cause,
        } => {
            tracing::warn!(
                context = %context,
                breaker = %breaker,
                half_open_in = ?remaining,
                cause = %describe(cause.as_ref()),
                "Circuit breaker opened"
            );
            Ok(())
        }
        BreakerError::HalfOpenFailed {
            breaker,
            remaining,
            cause,
        } => {
            tracing::warn!(
                context = %context,
                breaker = %breaker,
                half_open_in = ?remaining,
                cause = %describe(cause.as_ref()),
                "Circuit breaker trial failed"
            );
            Ok(())
        }
        BreakerError::Open { breaker, remaining } => {
            tracing::debug!(
                context = %context,
                breaker = %breaker,
                half_open_in = ?remaining,
                "Circuit breaker is open"
            );
            Ok(())
        }
        BreakerError::Inner(e) => Err(e),
    }
}

fn describe<E: Display>(cause: Option<&E>) -> String {
    cause.map_or_else(|| "none".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::failure::Failure;
    use std::time::Duration;

    #[test]
    fn test_open_family_is_swallowed() {
        let opened: BreakerError<Failure> = BreakerError::JustOpened {
            breaker: "inverter".into(),
            remaining: Duration::from_secs(30),
            cause: Some(Failure::io("reset")),
        };
        let open: BreakerError<Failure> = BreakerError::Open {
            breaker: "inverter".into(),
            remaining: Duration::from_secs(10),
        };

        assert!(log_breaker_error("poll", opened).is_ok());
        assert!(log_breaker_error("poll", open).is_ok());
    }

    #[test]
    fn test_inner_is_returned() {
        let err: BreakerError<Failure> = BreakerError::Inner(Failure::internal("bad pointer"));
        let returned = log_breaker_error("poll", err).unwrap_err();
        assert_eq!(returned, Failure::internal("bad pointer"));
    }
}
