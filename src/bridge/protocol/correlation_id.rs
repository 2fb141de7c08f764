//! Correlation identifier carried in the `requestId` envelope field.
//!
//! This module provides a type-safe wrapper for request correlation tokens,
//! preventing confusion with other string fields such as device or command ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation token for matching asynchronous responses to their request.
///
/// Every logical request gets a fresh random UUID (v4), so tokens are unique
/// for the lifetime of the process. The gateway echoes the token back in the
/// `requestId` field of its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Allocate a fresh correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the correlation id from a decoded gateway message.
    ///
    /// Returns `None` if the `requestId` field is missing or not a string
    /// (bootstrap messages and pushed events).
    pub fn from_json(message: &serde_json::Value) -> Option<Self> {
        message
            .get("requestId")?
            .as_str()
            .map(|id| Self(id.to_string()))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
