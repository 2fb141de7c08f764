//! Wire envelopes for gateway communication.
//!
//! ## Module Structure
//!
//! - `correlation_id` - CorrelationId type carried in the `requestId` field
//! - `action` - The string-valued `action` field
//! - `request` - Outgoing envelope construction
//! - `response` - Response decoding, success checks and inbound classification
//! - `bootstrap` - The first, uncorrelated session handshake message

mod action;
mod bootstrap;
mod correlation_id;
mod request;
mod response;

pub use action::Action;
pub(crate) use bootstrap::{BootstrapOutcome, parse_bootstrap};
pub use correlation_id::CorrelationId;
pub(crate) use request::build_request;
pub(crate) use response::{Inbound, classify, id_string};
pub use response::ResponsePayload;
