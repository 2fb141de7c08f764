//! Session bootstrap envelope.
//!
//! The first messages on a fresh observe relationship do not follow the
//! correlation protocol. The gateway reports `{status: 0}` and the
//! server-assigned session id `{id}`, either together or as two consecutive
//! deliveries.

use serde_json::Value;

use crate::bridge::session::SessionId;

/// Result of interpreting one bootstrap delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BootstrapOutcome {
    /// The session id was assigned.
    Session(SessionId),
    /// A status-only acknowledgement; the id follows in a later delivery.
    Acknowledged,
    /// The gateway refused the session or sent something unusable.
    Failed(String),
}

pub(crate) fn parse_bootstrap(message: &Value) -> BootstrapOutcome {
    if let Some(error) = message.get("error") {
        let text = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return BootstrapOutcome::Failed(text);
    }

    if let Some(status) = message.get("status") {
        let ok = status.as_i64() == Some(0) || status.as_str() == Some("success");
        if !ok {
            return BootstrapOutcome::Failed(format!("invalid status: {}", status));
        }
    }

    match message.get("id") {
        Some(id) => match SessionId::from_json(id) {
            Some(session) => BootstrapOutcome::Session(session),
            None => BootstrapOutcome::Failed(format!("invalid session id: {}", id)),
        },
        None if message.get("status").is_some() => BootstrapOutcome::Acknowledged,
        None => BootstrapOutcome::Failed(format!("unexpected bootstrap message: {}", message)),
    }
}
