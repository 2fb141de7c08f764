//! Transports carrying bridge requests to the gateway.
//!
//! The bridge does not speak CoAP itself. It hands `OutboundRequest`s to a
//! transport through a bounded queue and receives raw response payloads back,
//! in whatever order the transport delivers them.
//!
//! - `coap` - CoAP over UDP (`coap-lite` packets on a tokio socket)
//! - `memory` - In-process pair for embedding and tests

pub mod coap;
pub mod memory;

use tokio::sync::mpsc;

use crate::bridge::SessionId;

/// Queue capacity for outbound requests.
///
/// Bounds memory use and provides backpressure to callers.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Queue capacity for inbound deliveries.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Request method used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
}

/// One request for the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    /// Register an observe relationship (`Observe: 0`).
    pub observe: bool,
    /// Session id to attach as the custom session option.
    pub session: Option<SessionId>,
    pub payload: Option<Vec<u8>>,
}

impl OutboundRequest {
    /// The bootstrap request: an observe `GET` without payload or session.
    pub fn bootstrap(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            observe: true,
            session: None,
            payload: None,
        }
    }

    /// Decode the payload as JSON, if there is one.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        self.payload
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

/// The bridge's end of a transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Requests to send.
    pub outbound: mpsc::Sender<OutboundRequest>,
    /// Raw response payloads, one per delivery.
    pub inbound: mpsc::Receiver<Vec<u8>>,
}
