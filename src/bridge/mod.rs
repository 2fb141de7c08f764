//! Correlated request/response bridge to a DeviceHive gateway.
//!
//! A caller issues a logical request (`authenticate`, `device/save`, ...) and
//! awaits its response, while the transport delivers responses asynchronously
//! and in any order. The bridge tags every request with a fresh
//! `CorrelationId`, parks the caller on a oneshot channel keyed by that id and
//! lets a reader task route each delivery to its waiter.
//!
//! # Module Structure
//!
//! - `actor` - PendingResponseStore and the reader task
//! - `events` - Dispatch of pushed subscription events to handlers
//! - `protocol` - CorrelationId, actions, request envelopes, response decoding
//! - `session` - SessionId and its write-once publication slot
//! - `timeout` - Validated request and bootstrap timeouts
//!
//! # Lifecycle
//!
//! `Bridge::spawn` starts the reader and queues the bootstrap request. Until
//! the gateway assigns a session id every request waits (bounded by the
//! bootstrap timeout); afterwards each request carries the session id as a
//! transport-level option.

mod actor;
mod events;
mod protocol;
mod session;
mod timeout;

use std::sync::{Arc, Weak};

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use actor::{
    PendingResponseStore, ReaderContext, ReaderTaskHandle, Registration, spawn_reader_task,
};
use events::EventDispatcher;
use protocol::build_request;
use session::SessionSlot;

pub use events::{Event, EventHandler, EventKind};
pub use protocol::{Action, CorrelationId, ResponsePayload};
pub use session::SessionId;
pub use timeout::{BootstrapTimeout, RequestTimeout};

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{Method, OutboundRequest, TransportLink};

/// How the bridge addresses the gateway and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Resource path for the bootstrap and every correlated request.
    pub path: String,
    /// Method for correlated requests.
    pub method: Method,
    /// Whether correlated requests register an observe relationship.
    pub observe: bool,
    pub request_timeout: RequestTimeout,
    pub bootstrap_timeout: BootstrapTimeout,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            method: Method::Get,
            observe: true,
            request_timeout: RequestTimeout::default(),
            bootstrap_timeout: BootstrapTimeout::default(),
        }
    }
}

impl BridgeOptions {
    pub fn from_settings(settings: &BridgeSettings) -> BridgeResult<Self> {
        Ok(Self {
            path: settings.gateway.path.clone(),
            method: settings.gateway.request_method,
            observe: settings.gateway.observe_requests,
            request_timeout: settings.timeouts.request_timeout()?,
            bootstrap_timeout: settings.timeouts.bootstrap_timeout()?,
        })
    }
}

/// Handle to a running bridge.
///
/// Cloning is cheap; all clones share one reader task and one response store.
/// The reader stops when the last clone is dropped or `close` is called.
/// Event handlers should capture a `WeakBridge`: a strong clone inside a
/// handler keeps the bridge alive until `close`.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Non-owning handle to a bridge, for use inside event handlers.
#[derive(Clone)]
pub struct WeakBridge {
    inner: Weak<BridgeInner>,
}

impl WeakBridge {
    /// The bridge, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<Bridge> {
        self.inner.upgrade().map(|inner| Bridge { inner })
    }
}

impl std::fmt::Debug for WeakBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBridge")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct BridgeInner {
    outbound: mpsc::Sender<OutboundRequest>,
    store: Arc<PendingResponseStore>,
    session: Arc<SessionSlot>,
    events: Arc<EventDispatcher>,
    options: BridgeOptions,
    reader: ReaderTaskHandle,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("options", &self.inner.options)
            .field("pending", &self.inner.store.pending_count())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Start the reader task and queue the bootstrap request.
    ///
    /// Returns as soon as the bootstrap request is queued; requests issued
    /// before the session id arrives wait for it.
    pub async fn spawn(link: TransportLink, options: BridgeOptions) -> BridgeResult<Self> {
        let TransportLink { outbound, inbound } = link;

        let store = Arc::new(PendingResponseStore::new());
        let session = Arc::new(SessionSlot::new());
        let events = Arc::new(EventDispatcher::new());

        let reader = spawn_reader_task(
            inbound,
            ReaderContext {
                store: Arc::clone(&store),
                session: Arc::clone(&session),
                events: Arc::clone(&events),
            },
        );

        outbound
            .send(OutboundRequest::bootstrap(options.path.clone()))
            .await
            .map_err(|_| BridgeError::transport_closed("outbound queue closed before bootstrap"))?;
        debug!(target: "dh_coap::bridge", "Bootstrap request queued on {}", options.path);

        Ok(Self {
            inner: Arc::new(BridgeInner {
                outbound,
                store,
                session,
                events,
                options,
                reader,
            }),
        })
    }

    /// Spawn the bridge and wait for the session id.
    ///
    /// A bootstrap failure or timeout aborts construction.
    pub async fn connect(link: TransportLink, options: BridgeOptions) -> BridgeResult<Self> {
        let bridge = Self::spawn(link, options).await?;
        bridge.wait_for_session().await?;
        Ok(bridge)
    }

    /// Wait for the session id, bounded by the bootstrap timeout.
    pub async fn wait_for_session(&self) -> BridgeResult<SessionId> {
        self.inner
            .session
            .wait(self.inner.options.bootstrap_timeout.as_duration())
            .await
    }

    /// The session id, once the gateway has assigned one.
    pub fn session_id(&self) -> Option<SessionId> {
        match self.inner.session.current() {
            session::SessionState::Ready(id) => Some(id),
            _ => None,
        }
    }

    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Send a correlated request and wait for its response.
    ///
    /// `params` must be a JSON object (or `null`). A response whose `status`
    /// is not `"success"` becomes `BridgeError::Protocol`.
    pub async fn send(&self, action: Action, params: Value) -> BridgeResult<ResponsePayload> {
        self.send_with_id(CorrelationId::new(), action, params).await
    }

    pub(crate) async fn send_with_id(
        &self,
        request_id: CorrelationId,
        action: Action,
        params: Value,
    ) -> BridgeResult<ResponsePayload> {
        if self.inner.reader.is_cancelled() {
            return Err(BridgeError::transport_closed("bridge closed"));
        }
        let session = self.wait_for_session().await?;
        let envelope = build_request(action, &request_id, params)?;
        let payload = serde_json::to_vec(&envelope)?;

        // Register before queuing so a fast response is never missed.
        let registration = self.inner.store.register(request_id.clone())?;

        let request = OutboundRequest {
            method: self.inner.options.method,
            path: self.inner.options.path.clone(),
            observe: self.inner.options.observe,
            session: Some(session),
            payload: Some(payload),
        };

        debug!(
            target: "dh_coap::bridge",
            "Sending {} as {}: {}",
            action,
            request_id,
            envelope
        );

        if self.inner.outbound.send(request).await.is_err() {
            self.inner.store.remove(&request_id);
            return Err(BridgeError::transport_closed("outbound queue closed"));
        }

        let response = match registration {
            Registration::Ready(response) => response,
            Registration::Waiting(rx) => {
                let timeout = self.inner.options.request_timeout.as_duration();
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(delivery)) => delivery.map_err(|reason| reason.into_error())?,
                    Ok(Err(_)) => {
                        return Err(BridgeError::transport_closed(
                            "response store dropped the waiter",
                        ));
                    }
                    Err(_) => {
                        self.inner.store.abandon(&request_id);
                        warn!(
                            target: "dh_coap::bridge",
                            "No response to {} ({}) within {:?}",
                            action,
                            request_id,
                            timeout
                        );
                        return Err(BridgeError::timeout(
                            format!("response to {}", action),
                            timeout,
                        ));
                    }
                }
            }
        };

        ResponsePayload::new(response).into_result(action.as_str())
    }

    /// Replace the handler for one event kind; `None` clears it.
    ///
    /// Handlers run on the reader task and must not block. To issue a
    /// follow-up request, upgrade a `WeakBridge` and spawn a task.
    pub fn set_event_handler(
        &self,
        kind: EventKind,
        handler: Option<EventHandler>,
    ) -> Option<EventHandler> {
        self.inner.events.set_handler(kind, handler)
    }

    pub fn has_event_handler(&self, kind: EventKind) -> bool {
        self.inner.events.has_handler(kind)
    }

    /// Number of callers currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.store.pending_count()
    }

    /// Number of responses that arrived before anyone waited for them.
    pub fn buffered_responses(&self) -> usize {
        self.inner.store.buffered_count()
    }

    pub fn is_buffered(&self, request_id: &CorrelationId) -> bool {
        self.inner.store.is_buffered(request_id)
    }

    /// Take a buffered response without sending anything.
    pub fn take_buffered(&self, request_id: &CorrelationId) -> Option<ResponsePayload> {
        self.inner
            .store
            .take_buffered(request_id)
            .map(ResponsePayload::new)
    }

    /// Stop the reader task; pending and future requests fail.
    pub fn close(&self) {
        self.inner.reader.cancel();
    }
}
