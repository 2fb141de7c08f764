//! Pending response store for correlated requests.
//!
//! This module provides the PendingResponseStore which matches gateway
//! responses to their waiting callers via oneshot channels, and buffers
//! responses that arrive before anyone waits for them.
//!
//! # Protocol
//!
//! - Before queuing a request, call `register(id)`. If the response already
//!   arrived it is handed back immediately and removed from the store.
//! - The reader task calls `route(id, response)` for every correlated response.
//!   A registered waiter receives it; otherwise it is buffered under its own id.
//! - A caller that gives up calls `abandon(id)` so a late response is dropped
//!   rather than buffered forever.
//! - Ids that were answered or abandoned are retired. Any further response for
//!   a retired id (a retransmission, or the reply to a request whose answer
//!   was already buffered) is dropped. Only the most recent
//!   `RETIRED_CAPACITY` ids are remembered.
//! - Once the transport is gone, `close` fails every waiter and `register`
//!   refuses new ones.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::protocol::CorrelationId;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Number of retired correlation ids remembered for dropping stray responses.
pub(crate) const RETIRED_CAPACITY: usize = 1024;

/// Why a waiter will never see its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Undeliverable {
    /// The gateway reported a connection-level error.
    Gateway(String),
    /// The transport stopped delivering.
    TransportClosed(String),
}

impl Undeliverable {
    pub(crate) fn into_error(self) -> BridgeError {
        match self {
            Undeliverable::Gateway(message) => BridgeError::gateway(message),
            Undeliverable::TransportClosed(message) => BridgeError::transport_closed(message),
        }
    }
}

/// What a waiter eventually receives.
pub(crate) type Delivery = Result<Value, Undeliverable>;

/// Outcome of registering interest in a correlation id.
#[derive(Debug)]
pub(crate) enum Registration {
    /// The response arrived before the caller started waiting.
    Ready(Value),
    /// Await the receiver for the response.
    Waiting(oneshot::Receiver<Delivery>),
}

/// Outcome of routing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteResult {
    /// Handed to the registered waiter.
    Delivered,
    /// No waiter yet; kept for a later `register`.
    Buffered,
    /// The id was already answered or abandoned; the response was discarded.
    Dropped,
}

/// Correlation-keyed store shared by the reader task and callers.
pub(crate) struct PendingResponseStore {
    /// All store state behind a single mutex; every operation is a short
    /// map update and no lock is held across an await.
    state: std::sync::Mutex<StoreState>,
}

struct StoreState {
    /// Callers currently waiting, by correlation id.
    waiters: HashMap<CorrelationId, oneshot::Sender<Delivery>>,
    /// Responses that arrived before their caller registered.
    early: HashMap<CorrelationId, Value>,
    /// Ids whose response was consumed or whose caller gave up.
    retired: RetiredIds,
    /// Set once the transport is gone.
    closed: Option<String>,
}

/// Bounded FIFO set of retired ids.
struct RetiredIds {
    order: VecDeque<CorrelationId>,
    ids: HashSet<CorrelationId>,
    capacity: usize,
}

impl RetiredIds {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, id: CorrelationId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &CorrelationId) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

impl PendingResponseStore {
    pub(crate) fn new() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }

    pub(crate) fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            state: std::sync::Mutex::new(StoreState {
                waiters: HashMap::new(),
                early: HashMap::new(),
                retired: RetiredIds::with_capacity(capacity),
                closed: None,
            }),
        }
    }

    /// Register interest in the response for `id`.
    ///
    /// Fails with `DuplicateRequest` if a waiter for this id is already
    /// registered, and with `TransportClosed` once the store is closed.
    pub(crate) fn register(&self, id: CorrelationId) -> BridgeResult<Registration> {
        let mut state = self.state.lock().recover_poison("pending_store.register");

        if let Some(reason) = &state.closed {
            return Err(BridgeError::transport_closed(reason.clone()));
        }

        if state.waiters.contains_key(&id) {
            return Err(BridgeError::DuplicateRequest {
                request_id: id.to_string(),
            });
        }

        if let Some(response) = state.early.remove(&id) {
            state.retired.insert(id);
            return Ok(Registration::Ready(response));
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(Registration::Waiting(rx))
    }

    /// Route a correlated response.
    pub(crate) fn route(&self, id: CorrelationId, response: Value) -> RouteResult {
        let mut state = self.state.lock().recover_poison("pending_store.route");

        let waiter = state.waiters.remove(&id);
        if let Some(tx) = waiter {
            state.retired.insert(id);
            drop(state);
            return match tx.send(Ok(response)) {
                Ok(()) => RouteResult::Delivered,
                Err(_) => RouteResult::Dropped,
            };
        }

        if state.retired.contains(&id) {
            return RouteResult::Dropped;
        }

        if state.early.insert(id.clone(), response).is_some() {
            log::debug!(
                target: "dh_coap::bridge::store",
                "Duplicate early response for {}, keeping the latest",
                id
            );
        }
        RouteResult::Buffered
    }

    /// Remove a waiter without retiring the id.
    ///
    /// Used when the request never left the bridge (queue closed).
    pub(crate) fn remove(&self, id: &CorrelationId) -> bool {
        let mut state = self.state.lock().recover_poison("pending_store.remove");
        state.waiters.remove(id).is_some()
    }

    /// Give up waiting for `id`; a response arriving later is dropped.
    pub(crate) fn abandon(&self, id: &CorrelationId) {
        let mut state = self.state.lock().recover_poison("pending_store.abandon");
        if state.waiters.remove(id).is_some() {
            state.retired.insert(id.clone());
        }
    }

    /// Take a buffered response out of the store.
    pub(crate) fn take_buffered(&self, id: &CorrelationId) -> Option<Value> {
        let mut state = self.state.lock().recover_poison("pending_store.take_buffered");
        let response = state.early.remove(id);
        if response.is_some() {
            state.retired.insert(id.clone());
        }
        response
    }

    pub(crate) fn is_buffered(&self, id: &CorrelationId) -> bool {
        let state = self.state.lock().recover_poison("pending_store.is_buffered");
        state.early.contains_key(id)
    }

    pub(crate) fn pending_count(&self) -> usize {
        let state = self.state.lock().recover_poison("pending_store.pending_count");
        state.waiters.len()
    }

    pub(crate) fn buffered_count(&self) -> usize {
        let state = self.state.lock().recover_poison("pending_store.buffered_count");
        state.early.len()
    }

    pub(crate) fn retired_count(&self) -> usize {
        let state = self.state.lock().recover_poison("pending_store.retired_count");
        state.retired.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        let state = self.state.lock().recover_poison("pending_store.is_closed");
        state.closed.is_some()
    }

    /// Fail every registered waiter with `reason`.
    ///
    /// Called when the gateway reports a connection-level error. Buffered
    /// responses are kept and new registrations are still accepted.
    pub(crate) fn fail_all(&self, reason: Undeliverable) {
        let mut state = self.state.lock().recover_poison("pending_store.fail_all");
        let waiters: Vec<_> = state.waiters.drain().collect();

        // Release lock before sending
        drop(state);

        for (_, tx) in waiters {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    /// Fail every waiter and refuse further registrations.
    pub(crate) fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state.lock().recover_poison("pending_store.close");
            if state.closed.is_none() {
                state.closed = Some(reason.clone());
            }
        }
        self.fail_all(Undeliverable::TransportClosed(reason));
    }
}
