//! Request envelope construction.

use serde_json::Value;

use super::action::Action;
use super::correlation_id::CorrelationId;
use crate::error::{BridgeError, BridgeResult};

/// Build a correlated request envelope.
///
/// The parameters must be a JSON object (or `null` for an action without
/// parameters). `action` and `requestId` are written last so a caller cannot
/// override them through the parameters.
pub(crate) fn build_request(
    action: Action,
    request_id: &CorrelationId,
    params: Value,
) -> BridgeResult<Value> {
    let mut envelope = match params {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(BridgeError::invalid_params(format!(
                "{} parameters must be a JSON object, got {}",
                action, other
            )));
        }
    };

    envelope.insert("action".to_string(), Value::from(action.as_str()));
    envelope.insert("requestId".to_string(), Value::from(request_id.as_str()));

    Ok(Value::Object(envelope))
}
