//! Actor components for the correlation bridge.
//!
//! # Components
//!
//! - `PendingResponseStore`: Matches responses to waiting callers via oneshot
//!   channels and buffers responses that arrive early
//! - `Reader`: Background task that drains transport deliveries and routes
//!   bootstrap messages, correlated responses and pushed events

mod pending_store;
mod reader;

pub(crate) use pending_store::{PendingResponseStore, Registration};
pub(crate) use reader::{ReaderContext, ReaderTaskHandle, spawn_reader_task};
