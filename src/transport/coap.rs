//! CoAP over UDP transport.
//!
//! This module provides the transport the bridge uses against a real
//! gateway. Packet framing comes from `coap-lite`; the socket is a connected
//! tokio `UdpSocket` shared by two tasks:
//!
//! - Writer: encodes each `OutboundRequest` as a Confirmable request with a
//!   fresh message id and token, and sends it
//! - Reader: decodes datagrams, ACKs Confirmable messages with an empty ACK
//!   and forwards non-empty response payloads to the bridge. A Confirmable
//!   message retransmitted after a lost ACK is acknowledged again but
//!   forwarded only once.
//!
//! Outbound retransmission is not implemented; a lost datagram surfaces as a
//! request timeout in the bridge.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{INBOUND_QUEUE_CAPACITY, Method, OUTBOUND_QUEUE_CAPACITY, OutboundRequest, TransportLink};
use crate::config::GatewaySettings;
use crate::error::{BridgeError, BridgeResult};

/// `Content-Format` value for `application/json`.
const CONTENT_FORMAT_JSON: u8 = 50;

/// Largest datagram accepted from the gateway.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Confirmable message ids remembered for duplicate detection.
const RECENT_MESSAGE_IDS: usize = 64;

/// Handle to a running CoAP transport.
///
/// Dropping the handle stops both tasks.
#[derive(Debug)]
pub struct CoapTransportHandle {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    _writer: JoinHandle<()>,
    _reader: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl CoapTransportHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Stop the writer and reader tasks.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for CoapTransportHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Connect to the gateway and spawn the writer and reader tasks.
pub async fn connect(gateway: &GatewaySettings) -> BridgeResult<(TransportLink, CoapTransportHandle)> {
    let peer_addr = tokio::net::lookup_host((gateway.host.as_str(), gateway.port))
        .await?
        .next()
        .ok_or_else(|| {
            BridgeError::config(format!("cannot resolve {}:{}", gateway.host, gateway.port))
        })?;

    let bind_addr: SocketAddr = if peer_addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(peer_addr).await?;
    let local_addr = socket.local_addr()?;
    let socket = Arc::new(socket);

    debug!(
        target: "dh_coap::transport::coap",
        "Connected {} -> {}",
        local_addr,
        peer_addr
    );

    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let cancel_token = CancellationToken::new();

    let encoder = PacketEncoder::new(gateway.session_option);
    let writer = tokio::spawn(writer_loop(
        Arc::clone(&socket),
        outbound_rx,
        encoder,
        cancel_token.clone(),
    ));
    let reader = tokio::spawn(reader_loop(socket, inbound_tx, cancel_token.clone()));

    Ok((
        TransportLink { outbound, inbound },
        CoapTransportHandle {
            local_addr,
            peer_addr,
            _writer: writer,
            _reader: reader,
            cancel_token,
        },
    ))
}

/// Encodes outbound requests into CoAP datagrams.
pub(crate) struct PacketEncoder {
    session_option: u16,
    next_message_id: u16,
}

impl PacketEncoder {
    pub(crate) fn new(session_option: u16) -> Self {
        // Random initial message id
        let seed = uuid::Uuid::new_v4();
        let bytes = seed.as_bytes();
        Self {
            session_option,
            next_message_id: u16::from_be_bytes([bytes[0], bytes[1]]),
        }
    }

    fn allocate_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    pub(crate) fn encode(&mut self, request: &OutboundRequest) -> BridgeResult<Vec<u8>> {
        let message_id = self.allocate_message_id();

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(match request.method {
            Method::Get => RequestType::Get,
            Method::Post => RequestType::Post,
        });
        packet.header.message_id = message_id;
        packet.set_token(message_id.to_be_bytes().to_vec());

        if request.observe {
            // Observe register is the uint 0, encoded as a zero-length value
            packet.add_option(CoapOption::Observe, Vec::new());
        }
        for segment in request.path.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        if let Some(payload) = &request.payload {
            packet.add_option(CoapOption::ContentFormat, vec![CONTENT_FORMAT_JSON]);
            packet.payload = payload.clone();
        }
        if let Some(session) = request.session {
            packet.add_option(
                CoapOption::Unknown(self.session_option),
                session.to_option_value(),
            );
        }

        packet
            .to_bytes()
            .map_err(|e| BridgeError::coap(format!("cannot encode request: {:?}", e)))
    }
}

/// Build the empty ACK for a Confirmable message.
pub(crate) fn empty_ack(message_id: u16) -> BridgeResult<Vec<u8>> {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.code = MessageClass::Empty;
    packet.header.message_id = message_id;
    packet
        .to_bytes()
        .map_err(|e| BridgeError::coap(format!("cannot encode ACK: {:?}", e)))
}

/// What the reader does with one decoded datagram.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Decoded {
    /// Message id to acknowledge, for Confirmable messages.
    pub(crate) ack: Option<u16>,
    /// Response payload to forward to the bridge.
    pub(crate) payload: Option<Vec<u8>>,
}

pub(crate) fn decode_datagram(datagram: &[u8]) -> BridgeResult<Decoded> {
    let packet = Packet::from_bytes(datagram)
        .map_err(|e| BridgeError::coap(format!("cannot decode datagram: {:?}", e)))?;

    let ack = match packet.header.get_type() {
        MessageType::Confirmable => Some(packet.header.message_id),
        _ => None,
    };

    let is_response = matches!(packet.header.code, MessageClass::Response(_));
    let payload = if is_response && !packet.payload.is_empty() {
        Some(packet.payload)
    } else {
        None
    };

    Ok(Decoded { ack, payload })
}

/// Bounded window of recently received Confirmable message ids.
pub(crate) struct RecentMessageIds {
    order: VecDeque<u16>,
    ids: HashSet<u16>,
    capacity: usize,
}

impl RecentMessageIds {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `message_id`; false when it is already in the window.
    pub(crate) fn first_seen(&mut self, message_id: u16) -> bool {
        if !self.ids.insert(message_id) {
            return false;
        }
        self.order.push_back(message_id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

async fn writer_loop(
    socket: Arc<UdpSocket>,
    mut rx: mpsc::Receiver<OutboundRequest>,
    mut encoder: PacketEncoder,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(target: "dh_coap::transport::coap", "Writer cancelled, shutting down");
                return;
            }

            request = rx.recv() => {
                let Some(request) = request else {
                    debug!(target: "dh_coap::transport::coap", "Outbound queue closed, writer exiting");
                    return;
                };

                let datagram = match encoder.encode(&request) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        warn!(target: "dh_coap::transport::coap", "Dropping request: {}", e);
                        continue;
                    }
                };

                if let Err(e) = socket.send(&datagram).await {
                    warn!(target: "dh_coap::transport::coap", "Send error: {}", e);
                }
            }
        }
    }
}

async fn reader_loop(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Vec<u8>>,
    cancel_token: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut recent = RecentMessageIds::new(RECENT_MESSAGE_IDS);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(target: "dh_coap::transport::coap", "Reader cancelled, shutting down");
                return;
            }

            received = socket.recv(&mut buf) => {
                let len = match received {
                    Ok(len) => len,
                    Err(e) => {
                        // ICMP errors surface on connected sockets; the
                        // gateway may come back, so keep reading.
                        warn!(target: "dh_coap::transport::coap", "Receive error: {}", e);
                        continue;
                    }
                };

                let decoded = match decode_datagram(&buf[..len]) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        debug!(target: "dh_coap::transport::coap", "Ignoring datagram: {}", e);
                        continue;
                    }
                };

                if let Some(message_id) = decoded.ack {
                    match empty_ack(message_id) {
                        Ok(ack) => {
                            if let Err(e) = socket.send(&ack).await {
                                warn!(target: "dh_coap::transport::coap", "ACK send error: {}", e);
                            }
                        }
                        Err(e) => warn!(target: "dh_coap::transport::coap", "{}", e),
                    }
                    if !recent.first_seen(message_id) {
                        debug!(
                            target: "dh_coap::transport::coap",
                            "Duplicate message {} acknowledged, not forwarded",
                            message_id
                        );
                        continue;
                    }
                }

                if let Some(payload) = decoded.payload {
                    if inbound.send(payload).await.is_err() {
                        debug!(target: "dh_coap::transport::coap", "Bridge gone, reader exiting");
                        return;
                    }
                }
            }
        }
    }
}
