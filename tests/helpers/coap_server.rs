//! Minimal CoAP gateway on a loopback UDP socket.
//!
//! Speaks just enough CoAP (via `coap-lite`) to exercise the UDP transport:
//! receive a request, answer it piggybacked or as a separate Confirmable
//! response, and observe the client's ACKs.

// These methods are shared across multiple test binaries but not all tests use every method.
// Allow dead_code to suppress per-binary warnings.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, ResponseType};
use serde_json::Value;
use tokio::net::UdpSocket;

pub struct CoapServer {
    socket: UdpSocket,
    next_message_id: u16,
}

/// A datagram received from the client.
pub struct Incoming {
    pub packet: Packet,
    pub from: SocketAddr,
}

impl Incoming {
    /// First value of an option, if present.
    pub fn option(&self, option: CoapOption) -> Option<Vec<u8>> {
        self.packet
            .get_option(option)
            .and_then(|values| values.front().cloned())
    }

    pub fn has_option(&self, option: CoapOption) -> bool {
        self.packet.get_option(option).is_some()
    }

    pub fn uri_path(&self) -> Vec<String> {
        self.packet
            .get_option(CoapOption::UriPath)
            .map(|segments| {
                segments
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.packet.payload).expect("request payload is JSON")
    }
}

impl CoapServer {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("bind loopback socket");
        Self {
            socket,
            next_message_id: 0x7000,
        }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().expect("local addr").port()
    }

    pub async fn recv(&self) -> Incoming {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for a datagram")
            .expect("recv_from");
        let packet = Packet::from_bytes(&buf[..len]).expect("client sent a valid CoAP packet");
        Incoming { packet, from }
    }

    /// Answer `request` in its ACK (piggybacked response).
    pub async fn reply_piggybacked(&self, request: &Incoming, payload: &Value) {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.code = MessageClass::Response(ResponseType::Content);
        packet.header.message_id = request.packet.header.message_id;
        packet.set_token(request.packet.get_token().to_vec());
        packet.payload = serde_json::to_vec(payload).expect("encode payload");
        self.send(&packet, request.from).await;
    }

    /// Answer `request` with a separate Confirmable response; returns its message id.
    pub async fn reply_confirmable(&mut self, request: &Incoming, payload: &Value) -> u16 {
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let packet = confirmable_response(request, message_id, payload);
        self.send(&packet, request.from).await;
        message_id
    }

    /// Send the Confirmable response `message_id` again, as after a lost ACK.
    pub async fn retransmit_confirmable(&self, request: &Incoming, message_id: u16, payload: &Value) {
        let packet = confirmable_response(request, message_id, payload);
        self.send(&packet, request.from).await;
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) {
        let bytes = packet.to_bytes().expect("encode packet");
        self.socket.send_to(&bytes, to).await.expect("send_to");
    }
}

fn confirmable_response(request: &Incoming, message_id: u16, payload: &Value) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Confirmable);
    packet.header.code = MessageClass::Response(ResponseType::Content);
    packet.header.message_id = message_id;
    packet.set_token(request.packet.get_token().to_vec());
    packet.payload = serde_json::to_vec(payload).expect("encode payload");
    packet
}
