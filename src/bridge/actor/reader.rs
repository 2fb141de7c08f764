//! Reader task for transport deliveries.
//!
//! The Reader Task:
//! - Runs in a spawned tokio task
//! - Treats every delivery as bootstrap traffic until the session id is known
//! - Routes correlated responses to the PendingResponseStore
//! - Dispatches pushed events to their handler
//! - Fails all waiters on gateway errors and when the transport closes

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pending_store::{PendingResponseStore, RouteResult, Undeliverable};
use crate::bridge::events::{DispatchResult, EventDispatcher};
use crate::bridge::protocol::{BootstrapOutcome, Inbound, classify, parse_bootstrap};
use crate::bridge::session::SessionSlot;

/// Shared state the reader writes into.
#[derive(Clone)]
pub(crate) struct ReaderContext {
    pub(crate) store: Arc<PendingResponseStore>,
    pub(crate) session: Arc<SessionSlot>,
    pub(crate) events: Arc<EventDispatcher>,
}

/// Handle to a running Reader Task.
///
/// Dropping the handle cancels the task.
pub(crate) struct ReaderTaskHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ReaderTaskHandle {
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a reader task draining `inbound` into `context`.
pub(crate) fn spawn_reader_task(
    inbound: mpsc::Receiver<Vec<u8>>,
    context: ReaderContext,
) -> ReaderTaskHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(reader_loop(inbound, context, cancel_token.clone()));

    ReaderTaskHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn reader_loop(
    mut inbound: mpsc::Receiver<Vec<u8>>,
    context: ReaderContext,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(target: "dh_coap::bridge::reader", "Reader task cancelled, shutting down");
                close(&context, "bridge closed");
                break;
            }

            delivery = inbound.recv() => {
                match delivery {
                    Some(bytes) => {
                        handle_delivery(&bytes, &context);
                    }
                    None => {
                        warn!(
                            target: "dh_coap::bridge::reader",
                            "Transport closed, failing pending requests"
                        );
                        close(&context, "transport closed");
                        break;
                    }
                }
            }
        }
    }
}

fn close(context: &ReaderContext, reason: &str) {
    context.session.fail(format!("{} before the session id was assigned", reason));
    context.store.close(reason);
}

/// What the reader did with one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Handled {
    Bootstrap(BootstrapOutcome),
    Routed(RouteResult),
    Dispatched(DispatchResult),
    GatewayError,
    Ignored,
}

/// Handle a single delivery from the transport.
pub(crate) fn handle_delivery(bytes: &[u8], context: &ReaderContext) -> Handled {
    let message: Value = match serde_json::from_slice(bytes) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                target: "dh_coap::bridge::reader",
                "Undecodable delivery ({} bytes): {}",
                bytes.len(),
                e
            );
            return Handled::Ignored;
        }
    };

    debug!(target: "dh_coap::bridge::reader", "Delivery: {}", message);

    if context.session.is_pending() {
        let outcome = parse_bootstrap(&message);
        match &outcome {
            BootstrapOutcome::Session(id) => {
                if context.session.publish(*id) {
                    info!(target: "dh_coap::bridge::reader", "Session id assigned: {}", id);
                }
            }
            BootstrapOutcome::Acknowledged => {
                debug!(target: "dh_coap::bridge::reader", "Bootstrap acknowledged, awaiting session id");
            }
            BootstrapOutcome::Failed(reason) => {
                warn!(target: "dh_coap::bridge::reader", "Bootstrap failed: {}", reason);
                context.session.fail(reason.clone());
            }
        }
        return Handled::Bootstrap(outcome);
    }

    match classify(message) {
        Inbound::Response(id, response) => {
            let result = context.store.route(id.clone(), response);
            match result {
                RouteResult::Delivered => {}
                RouteResult::Buffered => debug!(
                    target: "dh_coap::bridge::reader",
                    "Buffered early response for {}",
                    id
                ),
                RouteResult::Dropped => debug!(
                    target: "dh_coap::bridge::reader",
                    "Dropped late response for {}",
                    id
                ),
            }
            Handled::Routed(result)
        }
        Inbound::Event(event) => {
            let result = context.events.dispatch(event);
            if result != DispatchResult::Handled {
                debug!(target: "dh_coap::bridge::reader", "Event not handled: {:?}", result);
            }
            Handled::Dispatched(result)
        }
        Inbound::GatewayError(reason) => {
            warn!(
                target: "dh_coap::bridge::reader",
                "Gateway error: {}, failing pending requests",
                reason
            );
            context.store.fail_all(Undeliverable::Gateway(reason));
            Handled::GatewayError
        }
        Inbound::Unrecognized(message) => {
            debug!(
                target: "dh_coap::bridge::reader",
                "Ignoring uncorrelated message: {}",
                message
            );
            Handled::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::actor::Registration;
    use crate::bridge::events::{Event, EventKind};
    use crate::bridge::protocol::CorrelationId;
    use crate::bridge::session::{SessionId, SessionState};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context() -> ReaderContext {
        ReaderContext {
            store: Arc::new(PendingResponseStore::new()),
            session: Arc::new(SessionSlot::new()),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    fn ready_context() -> ReaderContext {
        let ctx = context();
        ctx.session.publish(SessionId::new(42));
        ctx
    }

    fn bytes(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn first_delivery_is_bootstrap() {
        let ctx = context();
        let handled = handle_delivery(&bytes(json!({"status": 0, "id": 42})), &ctx);
        assert_eq!(
            handled,
            Handled::Bootstrap(BootstrapOutcome::Session(SessionId::new(42)))
        );
        assert_eq!(ctx.session.current(), SessionState::Ready(SessionId::new(42)));
    }

    #[test]
    fn bootstrap_in_two_deliveries() {
        let ctx = context();
        assert_eq!(
            handle_delivery(&bytes(json!({"status": 0})), &ctx),
            Handled::Bootstrap(BootstrapOutcome::Acknowledged)
        );
        assert!(ctx.session.is_pending());

        handle_delivery(&bytes(json!({"id": 17})), &ctx);
        assert_eq!(ctx.session.current(), SessionState::Ready(SessionId::new(17)));
    }

    #[test]
    fn bootstrap_failure_marks_session_failed() {
        let ctx = context();
        handle_delivery(&bytes(json!({"status": 3})), &ctx);
        assert!(matches!(ctx.session.current(), SessionState::Failed(_)));
    }

    #[test]
    fn after_session_id_messages_are_never_bootstrap() {
        let ctx = ready_context();
        let handled = handle_delivery(&bytes(json!({"status": 0, "id": 99})), &ctx);
        assert_eq!(handled, Handled::Ignored);
        assert_eq!(ctx.session.current(), SessionState::Ready(SessionId::new(42)));
    }

    #[test]
    fn correlated_response_is_buffered_without_waiter() {
        let ctx = ready_context();
        let handled = handle_delivery(
            &bytes(json!({"status": "success", "requestId": "r1"})),
            &ctx,
        );
        assert_eq!(handled, Handled::Routed(RouteResult::Buffered));
        assert!(ctx.store.is_buffered(&CorrelationId::from("r1")));
    }

    #[tokio::test]
    async fn correlated_response_reaches_waiter() {
        let ctx = ready_context();
        let rx = match ctx.store.register(CorrelationId::from("r2")) {
            Ok(Registration::Waiting(rx)) => rx,
            other => panic!("unexpected registration: {:?}", other),
        };

        let handled = handle_delivery(
            &bytes(json!({"status": "success", "requestId": "r2"})),
            &ctx,
        );
        assert_eq!(handled, Handled::Routed(RouteResult::Delivered));
        assert_eq!(rx.await.unwrap().unwrap()["requestId"], "r2");
    }

    #[test]
    fn pushed_event_goes_to_handler() {
        let ctx = ready_context();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ctx.events.set_handler(
            EventKind::NotificationInsert,
            Some(Arc::new(move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let handled = handle_delivery(
            &bytes(json!({"action": "notification/insert", "notification": {"notification": "n"}})),
            &ctx,
        );
        assert_eq!(handled, Handled::Dispatched(DispatchResult::Handled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.store.buffered_count(), 0, "events never enter the store");
    }

    #[tokio::test]
    async fn gateway_error_fails_waiters() {
        let ctx = ready_context();
        let rx = match ctx.store.register(CorrelationId::from("r3")) {
            Ok(Registration::Waiting(rx)) => rx,
            other => panic!("unexpected registration: {:?}", other),
        };

        let handled = handle_delivery(&bytes(json!({"error": "Websocket error"})), &ctx);
        assert_eq!(handled, Handled::GatewayError);
        assert_eq!(
            rx.await.unwrap().unwrap_err(),
            Undeliverable::Gateway("Websocket error".to_string())
        );
    }

    #[test]
    fn undecodable_delivery_is_ignored() {
        let ctx = context();
        assert_eq!(handle_delivery(b"not json", &ctx), Handled::Ignored);
        assert!(ctx.session.is_pending(), "garbage must not end the bootstrap");
    }

    #[tokio::test]
    async fn closed_transport_fails_pending_and_session() {
        let ctx = context();
        let (tx, rx) = mpsc::channel(4);
        let _handle = spawn_reader_task(rx, ctx.clone());

        drop(tx);

        let err = ctx.session.wait(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, crate::error::BridgeError::Bootstrap { .. }));
    }

    #[tokio::test]
    async fn reader_task_processes_deliveries_in_order() {
        let ctx = context();
        let (tx, rx) = mpsc::channel(4);
        let _handle = spawn_reader_task(rx, ctx.clone());

        tx.send(bytes(json!({"status": 0, "id": 5}))).await.unwrap();
        tx.send(bytes(json!({"status": "success", "requestId": "after"})))
            .await
            .unwrap();

        let id = ctx.session.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(id, SessionId::new(5));

        let store = Arc::clone(&ctx.store);
        let buffered = tokio::time::timeout(Duration::from_secs(2), async move {
            while !store.is_buffered(&CorrelationId::from("after")) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(buffered.is_ok(), "response after bootstrap should be buffered");
    }
}
