//! Outbox storage boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use leasehold_core::{DomainError, OutboxEventId};
use leasehold_events::{ClaimToken, EventStatus, NewOutboxEvent, OutboxEvent};

/// Outbox storage error.
///
/// These are infrastructure errors. Handler failures are never reported
/// through this type; they are recorded on the event itself.
#[derive(Debug, Clone, Error)]
pub enum OutboxStoreError {
    #[error("outbox event not found: {0}")]
    NotFound(OutboxEventId),

    /// The write was fenced off: the event is no longer held by the caller's
    /// claim (completed elsewhere, or reclaimed after being stuck).
    #[error("stale claim on outbox event {0}")]
    StaleClaim(OutboxEventId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for OutboxStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound => Self::Storage("not found".to_string()),
        }
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl OutboxStats {
    pub fn record(&mut self, status: EventStatus, count: usize) {
        match status {
            EventStatus::Pending => self.pending += count,
            EventStatus::Processing => self.processing += count,
            EventStatus::Completed => self.completed += count,
            EventStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Durable, queryable table of outbox events.
///
/// Producers only `enqueue`. Everything else is the dispatcher's (and the
/// operator's read-only) view. Rows are never deleted here.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new `pending` event with `retry_count = 0`.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError>;

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError>;

    /// Due `pending` events, ascending `scheduled_at`, at most `limit`. Read only.
    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError>;

    /// Atomically select and mark up to `limit` events as `processing`.
    ///
    /// Candidates are due `pending` events plus, when `stuck_before` is set,
    /// `processing` events claimed at or before that instant. The returned
    /// events carry the new `processed_at = now` stamp and are ordered by
    /// ascending `scheduled_at`. Two concurrent callers never receive the
    /// same event.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stuck_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError>;

    /// `processing` → `completed`.
    async fn mark_completed(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError>;

    /// `processing` → `pending` with a new retry count, due time and error.
    async fn reschedule(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxStoreError>;

    /// `processing` → `failed` (terminal).
    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        error: &str,
    ) -> Result<(), OutboxStoreError>;

    /// `processing` → `pending`, leaving retry count and schedule untouched.
    async fn release(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError>;

    /// Events by status (all statuses when `None`), oldest first.
    async fn list_by_status(
        &self,
        status: Option<EventStatus>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError>;

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError>;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        (**self).enqueue(event).await
    }

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        (**self).get(id).await
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        (**self).select_due(now, limit).await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stuck_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        (**self).claim_due(now, limit, stuck_before).await
    }

    async fn mark_completed(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        (**self).mark_completed(claim).await
    }

    async fn reschedule(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        (**self)
            .reschedule(claim, retry_count, next_attempt_at, error)
            .await
    }

    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        (**self).mark_failed(claim, retry_count, error).await
    }

    async fn release(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        (**self).release(claim).await
    }

    async fn list_by_status(
        &self,
        status: Option<EventStatus>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        (**self).list_by_status(status, limit).await
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        (**self).stats().await
    }
}
