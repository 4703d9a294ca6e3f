//! Transactional outbox.
//!
//! Producers write [`NewOutboxEvent`](leasehold_events::NewOutboxEvent)s in the
//! same transaction as their state change. A [`Dispatcher`] run then claims due
//! events, hands each one to its registered handler and records the outcome:
//!
//! ```text
//! pending ──claim──▶ processing ──ok──────────────▶ completed
//!    ▲                   │
//!    │                   ├──err, retries left──▶ pending (scheduled_at += backoff)
//!    │                   ├──err, exhausted─────▶ failed
//!    └────release────────┘  (run budget exhausted, or stuck reclaim)
//! ```
//!
//! Delivery is at-least-once. Handlers must be idempotent.

pub mod backoff;
pub mod dispatcher;
pub mod in_memory;
pub mod postgres;
pub mod store;

pub use backoff::Backoff;
pub use dispatcher::{DispatchError, DispatchSummary, Dispatcher};
pub use in_memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::{OutboxStats, OutboxStore, OutboxStoreError};
