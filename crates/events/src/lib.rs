//! Outbox events and the handler boundary.
//!
//! - `event`: the outbox record and its status state machine
//! - `handler`: the capability a side-effect handler implements
//! - `registry`: event-type → handler resolution

pub mod event;
pub mod handler;
pub mod registry;

pub use event::{ClaimToken, EventStatus, NewOutboxEvent, OutboxEvent, CLAIM_EXPIRED};
pub use handler::{EventHandler, FnHandler, HandlerError, HandlerResult};
pub use registry::HandlerRegistry;
