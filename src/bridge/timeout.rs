//! Validated deadlines for bridge waits.
//!
//! Every wait on the gateway is bounded. A response that never arrives
//! surfaces as `BridgeError::Timeout` instead of stalling the caller.

use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Smallest accepted deadline.
const MIN: Duration = Duration::from_millis(1);

/// Largest accepted deadline: 10 minutes.
const MAX: Duration = Duration::from_secs(600);

fn validate(kind: &str, duration: Duration) -> BridgeResult<Duration> {
    if duration < MIN {
        return Err(BridgeError::config(format!(
            "{} must be at least {:?}, got {:?}",
            kind, MIN, duration
        )));
    }
    if duration > MAX {
        return Err(BridgeError::config(format!(
            "{} must be at most {:?}, got {:?}",
            kind, MAX, duration
        )));
    }
    Ok(duration)
}

/// Deadline for one correlated request/response exchange.
///
/// # Valid Range
///
/// - Minimum: 1 millisecond
/// - Maximum: 10 minutes
/// - Default: 30 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(Duration);

impl RequestTimeout {
    const DEFAULT_SECS: u64 = 30;

    pub fn new(duration: Duration) -> BridgeResult<Self> {
        validate("request timeout", duration).map(Self)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for RequestTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

/// Deadline for receiving the session id after the bootstrap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapTimeout(Duration);

impl BootstrapTimeout {
    const DEFAULT_SECS: u64 = 30;

    pub fn new(duration: Duration) -> BridgeResult<Self> {
        validate("bootstrap timeout", duration).map(Self)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for BootstrapTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn request_timeout_default_is_30s() {
        assert_eq!(
            RequestTimeout::default().as_duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn request_timeout_rejects_zero() {
        let err = RequestTimeout::new(Duration::ZERO).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[rstest]
    #[case::one_millisecond(Duration::from_millis(1), true)]
    #[case::ten_minutes(Duration::from_secs(600), true)]
    #[case::sub_millisecond(Duration::from_micros(999), false)]
    #[case::over_ten_minutes(Duration::from_millis(600_001), false)]
    fn request_timeout_boundaries(#[case] duration: Duration, #[case] valid: bool) {
        assert_eq!(RequestTimeout::new(duration).is_ok(), valid);
    }

    #[test]
    fn bootstrap_timeout_validates_like_request_timeout() {
        assert!(BootstrapTimeout::new(Duration::from_millis(250)).is_ok());
        assert!(BootstrapTimeout::new(Duration::ZERO).is_err());
        assert_eq!(
            BootstrapTimeout::default().as_duration(),
            Duration::from_secs(30)
        );
    }
}
