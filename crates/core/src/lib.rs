//! Shared building blocks.
//!
//! Strongly-typed identifiers and the domain error model. No infrastructure
//! concerns live here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{NotificationId, OutboxEventId, UserId};
