//! Scripted DeviceHive gateway over the in-process transport.
//!
//! Plays the gateway side of `transport::memory::pair()`: accepts the
//! bootstrap request, hands each correlated envelope to the test and answers
//! it with a success (or error) envelope echoing its `requestId`.

// These methods are shared across multiple test binaries but not all tests use every method.
// Allow dead_code to suppress per-binary warnings.
#![allow(dead_code)]

use std::time::Duration;

use dh_coap_bridge::transport::memory::{GatewayEnd, pair};
use dh_coap_bridge::transport::{OutboundRequest, TransportLink};
use serde_json::{Value, json};

/// Upper bound for any single step in a scripted exchange.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FakeGateway {
    end: GatewayEnd,
}

/// A correlated request as the gateway saw it.
pub struct Received {
    pub request: OutboundRequest,
    pub envelope: Value,
}

impl Received {
    pub fn action(&self) -> &str {
        self.envelope["action"].as_str().unwrap_or_default()
    }

    pub fn request_id(&self) -> &str {
        self.envelope["requestId"].as_str().unwrap_or_default()
    }
}

impl FakeGateway {
    /// Create a bridge-side link and the gateway that serves it.
    pub fn start() -> (TransportLink, Self) {
        let (link, end) = pair();
        (link, Self { end })
    }

    /// Wait for the bootstrap request and answer it with `reply` messages.
    pub async fn accept_bootstrap(&mut self, replies: &[Value]) -> OutboundRequest {
        let request = self.next_request().await;
        assert!(request.payload.is_none(), "bootstrap carries no payload");
        assert!(request.session.is_none(), "bootstrap carries no session");
        for reply in replies {
            self.push(reply).await;
        }
        request
    }

    pub async fn next_request(&mut self) -> OutboundRequest {
        tokio::time::timeout(STEP_TIMEOUT, self.end.next_request())
            .await
            .expect("timed out waiting for a request")
            .expect("bridge closed its outbound queue")
    }

    /// Wait for the next correlated request and decode its envelope.
    pub async fn receive(&mut self) -> Received {
        let request = self.next_request().await;
        let envelope = request
            .payload_json()
            .expect("correlated request carries a JSON payload");
        Received { request, envelope }
    }

    /// Wait for a request with `action`, answer it with success plus `body`.
    pub async fn expect_and_reply(&mut self, action: &str, body: Value) -> Received {
        let received = self.receive().await;
        assert_eq!(received.action(), action, "unexpected request: {}", received.envelope);
        self.reply_success(&received, body).await;
        received
    }

    pub async fn reply_success(&self, to: &Received, body: Value) {
        self.reply(to, "success", body).await;
    }

    pub async fn reply_error(&self, to: &Received, code: Value, error: &str) {
        self.reply(to, "error", json!({"code": code, "error": error}))
            .await;
    }

    async fn reply(&self, to: &Received, status: &str, body: Value) {
        let mut response = json!({
            "action": to.action(),
            "status": status,
            "requestId": to.request_id(),
        });
        if let (Some(target), Value::Object(extra)) = (response.as_object_mut(), body) {
            target.extend(extra);
        }
        self.push(&response).await;
    }

    /// Deliver an uncorrelated message (bootstrap reply or pushed event).
    pub async fn push(&self, message: &Value) {
        self.end
            .deliver_json(message)
            .await
            .expect("bridge dropped its inbound queue");
    }

    /// Stop delivering; the bridge sees its transport close.
    pub fn disconnect(self) {
        drop(self.end);
    }
}
