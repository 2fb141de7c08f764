//! Error handling types for dh-coap-bridge
//!
//! This module provides the error taxonomy shared by the bridge, the
//! transports and the DeviceHive client.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The session handshake failed; the client cannot be used
    #[error("Bootstrap failed: {message}")]
    Bootstrap { message: String },

    /// The gateway answered a correlated request with a non-success status
    #[error("{action} failed (code: {}, error: {})", .code.as_deref().unwrap_or("-"), .message.as_deref().unwrap_or("-"))]
    Protocol {
        action: String,
        code: Option<String>,
        message: Option<String>,
    },

    /// No response arrived within the configured deadline
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// The gateway reported a failure that is not tied to a single request
    #[error("Gateway error: {message}")]
    Gateway { message: String },

    /// The transport stopped delivering messages
    #[error("Transport closed: {message}")]
    TransportClosed { message: String },

    /// CoAP packet encoding or decoding failed
    #[error("CoAP error: {message}")]
    Coap { message: String },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Request parameters could not be turned into an envelope
    #[error("Invalid request parameters: {message}")]
    InvalidParams { message: String },

    /// A response was missing a field the caller relies on
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// A waiter for this correlation id is already registered
    #[error("Request already pending: {request_id}")]
    DuplicateRequest { request_id: String },

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Codec(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper trait to recover guards from poisoned locks
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging the recovery.
    ///
    /// The context parameter identifies which operation triggered lock recovery.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "dh_coap::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Helper functions for common error patterns
impl BridgeError {
    /// Create a bootstrap error
    pub fn bootstrap(message: impl Into<String>) -> Self {
        BridgeError::Bootstrap {
            message: message.into(),
        }
    }

    /// Create a protocol error for a failed action
    pub fn protocol(
        action: impl Into<String>,
        code: Option<String>,
        message: Option<String>,
    ) -> Self {
        BridgeError::Protocol {
            action: action.into(),
            code,
            message,
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        BridgeError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Create a gateway error
    pub fn gateway(message: impl Into<String>) -> Self {
        BridgeError::Gateway {
            message: message.into(),
        }
    }

    /// Create a transport closed error
    pub fn transport_closed(message: impl Into<String>) -> Self {
        BridgeError::TransportClosed {
            message: message.into(),
        }
    }

    /// Create a CoAP codec error
    pub fn coap(message: impl Into<String>) -> Self {
        BridgeError::Coap {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create an invalid parameters error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        BridgeError::InvalidParams {
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        BridgeError::MalformedResponse {
            message: message.into(),
        }
    }

    /// True for errors reported by the gateway for a single request.
    pub fn is_protocol(&self) -> bool {
        matches!(self, BridgeError::Protocol { .. })
    }

    /// True when the caller gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn protocol_error_display_includes_code_and_message() {
        let err = BridgeError::protocol(
            "authenticate",
            Some("401".to_string()),
            Some("Unauthorized".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "authenticate failed (code: 401, error: Unauthorized)"
        );
        assert!(err.is_protocol());
    }

    #[test]
    fn protocol_error_display_without_fields() {
        let err = BridgeError::protocol("device/save", None, None);
        assert_eq!(err.to_string(), "device/save failed (code: -, error: -)");
    }

    #[test]
    fn timeout_error_is_flagged() {
        let err = BridgeError::timeout("response to command/insert", Duration::from_millis(5));
        assert!(err.is_timeout());
        assert!(!err.is_protocol());
        assert!(err.to_string().contains("command/insert"));
    }

    #[test]
    fn codec_error_converts_from_serde_json() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: BridgeError = parse.unwrap_err().into();
        assert!(matches!(err, BridgeError::Codec(_)));
    }

    #[test]
    fn recover_poison_returns_inner_guard() {
        let lock = Arc::new(Mutex::new(7));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        let guard = lock.lock().recover_poison("test");
        assert_eq!(*guard, 7);
    }
}
