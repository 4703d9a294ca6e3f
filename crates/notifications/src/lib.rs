//! In-app notifications raised by outbox events.
//!
//! Each handler persists a [`Notification`] (the authoritative effect; failure
//! retries the event) and then attempts a push (best effort; failure is logged).

pub mod handler;
pub mod notification;
pub mod push;
pub mod store;

pub use handler::{register_defaults, NotificationHandler};
pub use notification::{Notification, NotificationKind};
pub use push::{NoopPushGateway, PushError, PushGateway};
pub use store::{InMemoryNotificationStore, NotificationStore, NotificationStoreError};
