//! In-process transport.
//!
//! `pair()` connects a bridge to a `GatewayEnd` that plays the gateway:
//! it receives every request the bridge sends and injects deliveries.

use serde_json::Value;
use tokio::sync::mpsc;

use super::{INBOUND_QUEUE_CAPACITY, OUTBOUND_QUEUE_CAPACITY, OutboundRequest, TransportLink};
use crate::error::{BridgeError, BridgeResult};

/// The gateway side of an in-process transport.
#[derive(Debug)]
pub struct GatewayEnd {
    requests: mpsc::Receiver<OutboundRequest>,
    deliveries: mpsc::Sender<Vec<u8>>,
}

/// Create a connected bridge/gateway pair.
pub fn pair() -> (TransportLink, GatewayEnd) {
    let (outbound, requests) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (deliveries, inbound) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

    (
        TransportLink { outbound, inbound },
        GatewayEnd {
            requests,
            deliveries,
        },
    )
}

impl GatewayEnd {
    /// Next request sent by the bridge; `None` once the bridge is gone.
    pub async fn next_request(&mut self) -> Option<OutboundRequest> {
        self.requests.recv().await
    }

    /// Deliver a raw payload to the bridge.
    pub async fn deliver(&self, payload: Vec<u8>) -> BridgeResult<()> {
        self.deliveries
            .send(payload)
            .await
            .map_err(|_| BridgeError::transport_closed("bridge dropped its inbound queue"))
    }

    /// Deliver a JSON message to the bridge.
    pub async fn deliver_json(&self, message: &Value) -> BridgeResult<()> {
        self.deliver(serde_json::to_vec(message)?).await
    }

    /// A sender for delivering from another task.
    pub fn delivery_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.deliveries.clone()
    }

    /// Split into the raw request receiver and delivery sender.
    pub fn into_parts(self) -> (mpsc::Receiver<OutboundRequest>, mpsc::Sender<Vec<u8>>) {
        (self.requests, self.deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn requests_and_deliveries_flow_both_ways() {
        let (mut link, mut gateway) = pair();

        link.outbound
            .send(OutboundRequest::bootstrap("/"))
            .await
            .unwrap();
        let request = gateway.next_request().await.unwrap();
        assert_eq!(request.path, "/");

        gateway.deliver_json(&json!({"status": 0, "id": 1})).await.unwrap();
        let delivered = link.inbound.recv().await.unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&delivered).unwrap(),
            json!({"status": 0, "id": 1})
        );
    }

    #[tokio::test]
    async fn deliver_fails_after_bridge_side_dropped() {
        let (link, gateway) = pair();
        drop(link);

        let err = gateway.deliver(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportClosed { .. }));
    }
}
