//! Response decoding and inbound message classification.

use serde_json::Value;

use super::correlation_id::CorrelationId;
use crate::error::{BridgeError, BridgeResult};

/// The `status` value the gateway uses for a successful correlated request.
const SUCCESS_STATUS: &str = "success";

/// Decoded gateway response to a correlated request.
///
/// Wraps the raw JSON object and exposes the fields the client relies on.
/// Identifier fields accept both strings and numbers since gateways differ in
/// how they encode them; numbers are returned in their decimal form.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload(Value);

impl ResponsePayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn status(&self) -> Option<&Value> {
        self.0.get("status")
    }

    pub fn is_success(&self) -> bool {
        self.status().and_then(Value::as_str) == Some(SUCCESS_STATUS)
    }

    pub fn request_id(&self) -> Option<CorrelationId> {
        CorrelationId::from_json(&self.0)
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.0.get("subscriptionId").and_then(id_string)
    }

    /// Server-assigned id of the command in a `command/insert` response.
    pub fn command_id(&self) -> Option<String> {
        self.0.get("command")?.get("id").and_then(id_string)
    }

    pub fn error_code(&self) -> Option<String> {
        self.0.get("code").and_then(id_string)
    }

    pub fn error_message(&self) -> Option<String> {
        self.0.get("error").and_then(id_string)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Turn a non-success status into a protocol error for `action`.
    ///
    /// The gateway's `code` and `error` fields are carried over verbatim.
    pub(crate) fn into_result(self, action: &str) -> BridgeResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BridgeError::protocol(
                action,
                self.error_code(),
                self.error_message(),
            ))
        }
    }
}

/// Read an identifier that may be encoded as a string or a number.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// What an inbound message means once the session is established.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// Response to a correlated request.
    Response(CorrelationId, Value),
    /// Pushed subscription event (`action` without `requestId` and `status`).
    Event(Value),
    /// Failure reported by the gateway that is not tied to one request.
    GatewayError(String),
    /// Anything the bridge has no use for.
    Unrecognized(Value),
}

/// Classify a decoded inbound message.
pub(crate) fn classify(message: Value) -> Inbound {
    if let Some(id) = CorrelationId::from_json(&message) {
        return Inbound::Response(id, message);
    }

    let has_action = message.get("action").and_then(Value::as_str).is_some();
    if has_action && message.get("status").is_none() {
        return Inbound::Event(message);
    }

    if let Some(error) = message.get("error") {
        let text = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Inbound::GatewayError(text);
    }

    Inbound::Unrecognized(message)
}
