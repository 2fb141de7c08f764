//! Dispatch of pushed subscription events.
//!
//! Messages that carry an `action` but no `requestId` are not responses; they
//! are events pushed by the gateway for an active subscription. Each event
//! kind has at most one handler, which can be replaced or cleared at any time.
//!
//! Handlers run synchronously on the reader task, so a slow handler delays
//! every later delivery. A handler must not block on a bridge request; to
//! issue a follow-up request it clones the client and spawns a task.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::protocol::id_string;

/// Kind of pushed event, named after its `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CommandInsert,
    CommandUpdate,
    NotificationInsert,
}

impl EventKind {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "command/insert" => Some(EventKind::CommandInsert),
            "command/update" => Some(EventKind::CommandUpdate),
            "notification/insert" => Some(EventKind::NotificationInsert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CommandInsert => "command/insert",
            EventKind::CommandUpdate => "command/update",
            EventKind::NotificationInsert => "notification/insert",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pushed event with its raw JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    raw: Value,
}

impl Event {
    /// Decode an event; `None` if the action is not a known event kind.
    pub fn from_json(raw: Value) -> Option<Self> {
        let kind = EventKind::from_action(raw.get("action")?.as_str()?)?;
        Some(Self { kind, raw })
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.raw.get("subscriptionId").and_then(id_string)
    }

    pub fn command(&self) -> Option<&Value> {
        self.raw.get("command")
    }

    /// Server-assigned id of the command this event is about.
    pub fn command_id(&self) -> Option<String> {
        self.command()?.get("id").and_then(id_string)
    }

    pub fn notification(&self) -> Option<&Value> {
        self.raw.get("notification")
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Handler invoked for each event of one kind.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchResult {
    Handled,
    /// Known kind, but no handler registered.
    Unhandled,
    /// The action is not an event kind.
    Unknown,
    /// The handler panicked; the panic was contained.
    Panicked,
}

/// One replaceable, nullable handler per event kind.
pub(crate) struct EventDispatcher {
    handlers: DashMap<EventKind, EventHandler>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Replace the handler for `kind`; `None` clears it.
    ///
    /// Returns the previous handler.
    pub(crate) fn set_handler(
        &self,
        kind: EventKind,
        handler: Option<EventHandler>,
    ) -> Option<EventHandler> {
        match handler {
            Some(handler) => self.handlers.insert(kind, handler),
            None => self.handlers.remove(&kind).map(|(_, previous)| previous),
        }
    }

    pub(crate) fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub(crate) fn dispatch(&self, raw: Value) -> DispatchResult {
        let Some(event) = Event::from_json(raw) else {
            return DispatchResult::Unknown;
        };

        // Clone the handler out so no map guard is held while it runs;
        // a handler may replace handlers itself.
        let handler = self
            .handlers
            .get(&event.kind())
            .map(|entry| Arc::clone(entry.value()));

        let Some(handler) = handler else {
            return DispatchResult::Unhandled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
            Ok(()) => DispatchResult::Handled,
            Err(_) => {
                log::error!(
                    target: "dh_coap::bridge::events",
                    "Handler for {} panicked",
                    event.kind()
                );
                DispatchResult::Panicked
            }
        }
    }
}
