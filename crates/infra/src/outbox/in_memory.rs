use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use leasehold_core::OutboxEventId;
use leasehold_events::{ClaimToken, EventStatus, NewOutboxEvent, OutboxEvent};

use super::store::{OutboxStats, OutboxStore, OutboxStoreError};

/// In-memory outbox for tests/dev.
///
/// Claim-and-mark happens under a single write lock, which gives the same
/// at-most-one-claimant guarantee as the Postgres `SKIP LOCKED` claim.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    events: RwLock<HashMap<OutboxEventId, OutboxEvent>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a fully-formed row, bypassing producer defaults.
    pub fn insert_raw(&self, event: OutboxEvent) -> Result<(), OutboxStoreError> {
        self.write()?.insert(event.id, event);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<OutboxEventId, OutboxEvent>>, OutboxStoreError> {
        self.events
            .read()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<OutboxEventId, OutboxEvent>>, OutboxStoreError> {
        self.events
            .write()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))
    }

    /// Apply `f` to the event held by `claim`, or report a stale claim.
    fn with_claim(
        &self,
        claim: &ClaimToken,
        f: impl FnOnce(&mut OutboxEvent),
    ) -> Result<(), OutboxStoreError> {
        let mut events = self.write()?;
        let event = events
            .get_mut(&claim.id)
            .ok_or(OutboxStoreError::NotFound(claim.id))?;

        if !event.is_held_by(claim) {
            return Err(OutboxStoreError::StaleClaim(claim.id));
        }

        f(event);
        Ok(())
    }
}

fn by_schedule(a: &OutboxEvent, b: &OutboxEvent) -> std::cmp::Ordering {
    a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id))
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        event.validate()?;
        let stored = event.into_event(Utc::now());
        self.write()?.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let events = self.read()?;
        let mut due: Vec<_> = events.values().filter(|e| e.is_due(now)).cloned().collect();
        due.sort_by(by_schedule);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stuck_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let mut events = self.write()?;

        let mut candidates: Vec<_> = events
            .values()
            .filter(|e| e.is_due(now) || stuck_before.is_some_and(|before| e.is_stuck(before)))
            .map(|e| (e.scheduled_at, e.id))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        let mut reclaimed = 0usize;
        for (_, id) in candidates {
            if let Some(event) = events.get_mut(&id) {
                if event.status == EventStatus::Processing {
                    event.mark_reclaimed(now);
                    reclaimed += 1;
                } else {
                    event.mark_processing(now);
                }
                claimed.push(event.clone());
            }
        }

        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed stuck outbox events");
        }

        Ok(claimed)
    }

    async fn mark_completed(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        self.with_claim(claim, |e| e.mark_completed())
    }

    async fn reschedule(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        self.with_claim(claim, |e| e.mark_rescheduled(retry_count, next_attempt_at, error))
    }

    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        self.with_claim(claim, |e| e.mark_failed(retry_count, error))
    }

    async fn release(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        self.with_claim(claim, |e| e.mark_released())
    }

    async fn list_by_status(
        &self,
        status: Option<EventStatus>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let events = self.read()?;
        let mut result: Vec<_> = events
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let events = self.read()?;
        let mut stats = OutboxStats::default();
        for event in events.values() {
            stats.record(event.status, 1);
        }
        Ok(stats)
    }
}
