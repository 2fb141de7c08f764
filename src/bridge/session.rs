//! Session identifier and its one-shot publication slot.
//!
//! The gateway assigns exactly one session id per client lifetime, delivered
//! on the bootstrap observe relationship. Every later request carries it as
//! the custom session option. The slot is written by the reader task and read
//! by callers, so it is a `watch` channel: publication is visible to all
//! waiters and wakes them without polling.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{BridgeError, BridgeResult};

/// Server-issued session identifier ("message id" on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Read a session id encoded as a JSON number or a decimal string.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().map(Self),
            serde_json::Value::String(s) => s.trim().parse().ok().map(Self),
            _ => None,
        }
    }

    /// Option value carried on every post-bootstrap request.
    pub fn to_option_value(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the session handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Bootstrap request sent, session id not yet received
    Pending,
    /// Session id received; correlated requests may be sent
    Ready(SessionId),
    /// Bootstrap failed (refusal, bad status, transport gone)
    Failed(String),
}

/// Write-once holder for the session state.
pub(crate) struct SessionSlot {
    tx: watch::Sender<SessionState>,
}

impl SessionSlot {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Pending);
        Self { tx }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.tx.borrow(), SessionState::Pending)
    }

    /// Publish the session id. Only the first transition out of `Pending`
    /// takes effect; returns whether this call won.
    pub(crate) fn publish(&self, id: SessionId) -> bool {
        self.transition(SessionState::Ready(id))
    }

    /// Mark the bootstrap as failed. No effect once the slot left `Pending`.
    pub(crate) fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(SessionState::Failed(message.into()))
    }

    fn transition(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, SessionState::Pending) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the session id is known, bounded by `timeout`.
    pub(crate) async fn wait(&self, timeout: Duration) -> BridgeResult<SessionId> {
        let mut rx = self.tx.subscribe();
        let wait = async move {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    SessionState::Ready(id) => return Ok(id),
                    SessionState::Failed(message) => return Err(BridgeError::bootstrap(message)),
                    SessionState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(BridgeError::transport_closed("session slot dropped"));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BridgeError::timeout("session id", timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use serde_json::json;

    #[test]
    fn session_id_from_number_and_string() {
        assert_eq!(SessionId::from_json(&json!(42)), Some(SessionId::new(42)));
        assert_eq!(SessionId::from_json(&json!("42")), Some(SessionId::new(42)));
        assert_eq!(SessionId::from_json(&json!(-1)), None);
        assert_eq!(SessionId::from_json(&json!(null)), None);
    }

    #[test]
    fn option_value_is_decimal_text() {
        assert_eq!(SessionId::new(42).to_option_value(), b"42".to_vec());
    }

    #[test]
    fn publish_only_once() {
        let slot = SessionSlot::new();
        assert!(slot.is_pending());
        assert!(slot.publish(SessionId::new(1)));
        assert!(!slot.publish(SessionId::new(2)));
        assert!(!slot.fail("late failure"));
        assert_eq!(slot.current(), SessionState::Ready(SessionId::new(1)));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_ready() {
        let slot = SessionSlot::new();
        slot.publish(SessionId::new(42));
        let id = slot.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(id, SessionId::new(42));
    }

    #[tokio::test]
    async fn wait_wakes_on_publish() {
        let slot = Arc::new(SessionSlot::new());
        let publisher = Arc::clone(&slot);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(SessionId::new(9));
        });

        let id = slot.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(id, SessionId::new(9));
    }

    #[tokio::test]
    async fn wait_reports_failure() {
        let slot = SessionSlot::new();
        slot.fail("invalid status: 1");
        let err = slot.wait(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Bootstrap { .. }));
    }

    #[tokio::test]
    async fn wait_times_out_while_pending() {
        let slot = SessionSlot::new();
        let err = slot.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
