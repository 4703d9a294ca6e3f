//! Outbox dispatcher: claim a batch, run handlers, record outcomes.
//!
//! One call to [`Dispatcher::run_once`] is one stateless worker invocation.
//! Nothing is kept in memory between invocations; all progress lives on the
//! event rows. Several invocations may overlap (slow run + next cron tick):
//! the store's atomic claim guarantees each event has at most one live
//! claimant.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use leasehold_events::{
    ClaimToken, EventHandler, HandlerError, HandlerRegistry, OutboxEvent, CLAIM_EXPIRED,
};

use super::store::{OutboxStore, OutboxStoreError};
use crate::config::{ConfigError, DispatcherConfig};

/// Aggregate counts for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Events that reached `completed` (including unknown-type no-ops)
    pub processed: usize,
    /// Events whose attempt failed (rescheduled or terminal)
    pub failed: usize,
    /// Events whose outcome could not be written back, e.g. because the claim
    /// was lost; they stay `processing` until reclaimed
    pub unrecorded: usize,
    /// Events claimed by this invocation
    pub total: usize,
    /// Claimed events handed back unprocessed because the run budget ran out
    pub deferred: usize,
}

/// Invocation-level failure. Nothing is claimed when this is returned.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outbox store unavailable: {0}")]
    Store(#[from] OutboxStoreError),
}

/// What happened to a single claimed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Rescheduled,
    Failed,
    /// The handler ran but the result could not be written back.
    Unrecorded,
}

pub struct Dispatcher<S> {
    store: S,
    registry: HandlerRegistry,
    config: DispatcherConfig,
}

impl<S: OutboxStore> Dispatcher<S> {
    /// Build a dispatcher, rejecting configurations that could never claim
    /// or that would reclaim events still being handled.
    pub fn new(
        store: S,
        registry: HandlerRegistry,
        config: DispatcherConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one pass at the current wall-clock time.
    pub async fn run_once(&self) -> Result<DispatchSummary, DispatchError> {
        self.run_once_at(Utc::now()).await
    }

    /// Run one pass treating `now` as the current time.
    ///
    /// `now` drives due-ness, the claim stamp and stuck detection. Time spent
    /// inside the run is measured on the monotonic clock and added to `now`
    /// when a failure is rescheduled, so backoff counts from the failure.
    #[instrument(skip(self), fields(batch_limit = self.config.batch_limit))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<DispatchSummary, DispatchError> {
        let started = Instant::now();
        let stuck_before = self.config.stuck_timeout.and_then(|timeout| {
            chrono::Duration::from_std(timeout)
                .ok()
                .and_then(|timeout| now.checked_sub_signed(timeout))
        });

        let batch = self
            .store
            .claim_due(now, self.config.batch_limit, stuck_before)
            .await?;

        if batch.is_empty() {
            debug!("no due outbox events");
            return Ok(DispatchSummary::default());
        }

        let mut summary = DispatchSummary {
            total: batch.len(),
            ..Default::default()
        };

        let mut remaining = batch.into_iter();
        while let Some(event) = remaining.next() {
            if started.elapsed() >= self.config.run_budget {
                for event in std::iter::once(event).chain(remaining.by_ref()) {
                    self.release(&event).await;
                    summary.deferred += 1;
                }
                warn!(
                    deferred = summary.deferred,
                    budget_ms = self.config.run_budget.as_millis() as u64,
                    "run budget exhausted; released remaining events"
                );
                break;
            }

            match self.dispatch_event(&event, now, started).await {
                Outcome::Completed => summary.processed += 1,
                Outcome::Rescheduled | Outcome::Failed => summary.failed += 1,
                Outcome::Unrecorded => summary.unrecorded += 1,
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            unrecorded = summary.unrecorded,
            total = summary.total,
            deferred = summary.deferred,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "outbox dispatch finished"
        );

        Ok(summary)
    }

    async fn dispatch_event(
        &self,
        event: &OutboxEvent,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Outcome {
        let Some(claim) = event.claim_token() else {
            // Stores only return claimed rows; treat anything else as a bug in the store.
            error!(event_id = %event.id, status = %event.status, "claimed event is not processing");
            return Outcome::Unrecorded;
        };

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            retry_count = event.retry_count,
            "dispatching outbox event"
        );

        // Only a reclaim can bring an event here with no retries left.
        let max_retries = self.max_retries_for(event);
        if event.retry_count >= max_retries {
            let message = event.error_message.as_deref().unwrap_or(CLAIM_EXPIRED);
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                retry_count = event.retry_count,
                max_retries,
                error = %message,
                "outbox event exhausted its retries while stuck; not re-running"
            );
            return match self.store.mark_failed(&claim, event.retry_count, message).await {
                Ok(()) => Outcome::Failed,
                Err(store_err) => {
                    self.report_write_error(&claim, "mark_failed", &store_err);
                    Outcome::Unrecorded
                }
            };
        }

        let Some(handler) = self.registry.resolve(&event.event_type) else {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no handler registered; marking completed"
            );
            return self.complete(&claim).await;
        };

        match self.invoke(handler, event).await {
            Ok(()) => self.complete(&claim).await,
            Err(err) => {
                let failed_at = now
                    .checked_add_signed(
                        chrono::Duration::from_std(started.elapsed()).unwrap_or_default(),
                    )
                    .unwrap_or(now);
                self.record_failure(event, &claim, &err, failed_at).await
            }
        }
    }

    /// Run the handler on its own task so a panic or a timeout stays local
    /// to this event.
    async fn invoke(
        &self,
        handler: Arc<dyn EventHandler>,
        event: &OutboxEvent,
    ) -> Result<(), HandlerError> {
        let timeout = self.config.handler_timeout;
        let event_type = event.event_type.clone();
        let payload = event.payload.clone();

        let mut task =
            tokio::spawn(async move { handler.handle(&event_type, &payload).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(HandlerError::failed("handler panicked"))
            }
            Ok(Err(join_err)) => Err(HandlerError::failed(format!("handler aborted: {join_err}"))),
            Err(_) => {
                task.abort();
                Err(HandlerError::TimedOut(timeout))
            }
        }
    }

    async fn complete(&self, claim: &ClaimToken) -> Outcome {
        match self.store.mark_completed(claim).await {
            Ok(()) => Outcome::Completed,
            Err(err) => {
                self.report_write_error(claim, "mark_completed", &err);
                Outcome::Unrecorded
            }
        }
    }

    async fn record_failure(
        &self,
        event: &OutboxEvent,
        claim: &ClaimToken,
        err: &HandlerError,
        failed_at: DateTime<Utc>,
    ) -> Outcome {
        let retry_count = event.retry_count.saturating_add(1);
        let max_retries = self.max_retries_for(event);
        let message = err.to_string();

        if retry_count >= max_retries {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                retry_count,
                max_retries,
                error = %message,
                "outbox event failed permanently"
            );
            return match self.store.mark_failed(claim, retry_count, &message).await {
                Ok(()) => Outcome::Failed,
                Err(store_err) => {
                    self.report_write_error(claim, "mark_failed", &store_err);
                    Outcome::Unrecorded
                }
            };
        }

        let next_attempt_at = self.config.backoff().next_attempt_at(retry_count, failed_at);
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            retry_count,
            max_retries,
            next_attempt_at = %next_attempt_at,
            error = %message,
            "outbox event failed; rescheduled"
        );

        match self
            .store
            .reschedule(claim, retry_count, next_attempt_at, &message)
            .await
        {
            Ok(()) => Outcome::Rescheduled,
            Err(store_err) => {
                self.report_write_error(claim, "reschedule", &store_err);
                Outcome::Unrecorded
            }
        }
    }

    fn max_retries_for(&self, event: &OutboxEvent) -> u32 {
        event
            .effective_max_retries(self.config.default_max_retries)
            .max(1)
    }

    async fn release(&self, event: &OutboxEvent) {
        let Some(claim) = event.claim_token() else {
            return;
        };
        if let Err(err) = self.store.release(&claim).await {
            self.report_write_error(&claim, "release", &err);
        }
    }

    fn report_write_error(&self, claim: &ClaimToken, operation: &str, err: &OutboxStoreError) {
        match err {
            OutboxStoreError::StaleClaim(_) => warn!(
                event_id = %claim.id,
                operation,
                "claim lost before outcome was recorded; another run owns the event"
            ),
            _ => error!(
                event_id = %claim.id,
                operation,
                error = %err,
                "failed to record outbox outcome; event stays processing until reclaimed"
            ),
        }
    }
}
