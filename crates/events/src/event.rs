//! The outbox record and its lifecycle.
//!
//! ```text
//! pending ──claim──▶ processing ──ok──────▶ completed
//!    ▲                   │
//!    └──── reschedule ───┤
//!                        └──exhausted────▶ failed
//! ```
//!
//! `completed` and `failed` are terminal. Every transition out of
//! `processing` is fenced by the [`ClaimToken`] handed out when the event was
//! claimed.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use leasehold_core::{DomainError, OutboxEventId};

/// Error recorded when a stuck claim is taken over by a later run.
pub const CLAIM_EXPIRED: &str = "claim expired before an outcome was recorded";

/// Lifecycle status of an outbox event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for `scheduled_at` to pass
    Pending,
    /// Claimed by a dispatcher run
    Processing,
    /// Handler succeeded (or no handler was registered)
    Completed,
    /// Retries exhausted
    Failed,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Processing,
        EventStatus::Completed,
        EventStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }
}

impl core::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown event status '{other}' (expected pending, processing, completed or failed)"
            ))),
        }
    }
}

/// Proof that a dispatcher run holds the claim on an event.
///
/// The pair `(id, claimed_at)` matches the row's `processed_at` stamp. A
/// reclaim re-stamps the row, so writes carrying an older token are rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClaimToken {
    pub id: OutboxEventId,
    pub claimed_at: DateTime<Utc>,
}

/// An event as written by a producer, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_type: String,
    #[serde(default)]
    pub payload: JsonValue,
    /// Earliest delivery time; `None` means "now".
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Per-event retry ceiling; `None` defers to the dispatcher default.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewOutboxEvent {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            scheduled_at: None,
            max_retries: None,
        }
    }

    /// Deliver no earlier than `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Deliver no earlier than `delay` from now.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Producer-side validation applied by every store on enqueue.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.event_type.trim().is_empty() {
            return Err(DomainError::validation("event_type must not be empty"));
        }
        if self.max_retries == Some(0) {
            return Err(DomainError::validation("max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Materialize the stored record (`pending`, zero retries).
    pub fn into_event(self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id: OutboxEventId::new(),
            event_type: self.event_type,
            payload: self.payload,
            status: EventStatus::Pending,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            retry_count: 0,
            max_retries: self.max_retries,
            error_message: None,
            processed_at: None,
            created_at: now,
        }
    }
}

/// A row of the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    /// Discriminator used to resolve a handler (e.g. `Payment.Succeeded`)
    pub event_type: String,
    /// Handler-specific data; opaque to the dispatcher
    pub payload: JsonValue,
    pub status: EventStatus,
    /// Earliest time the event may be claimed
    pub scheduled_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Retry ceiling; `None` means the dispatcher default applies
    pub max_retries: Option<u32>,
    /// Last failure reason
    pub error_message: Option<String>,
    /// Stamp of the most recent claim
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Retry ceiling after applying the dispatcher default.
    pub fn effective_max_retries(&self, default_max_retries: u32) -> u32 {
        self.max_retries.unwrap_or(default_max_retries)
    }

    /// `pending` and due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.scheduled_at <= now
    }

    /// `processing` with a claim at or before `stuck_before`.
    pub fn is_stuck(&self, stuck_before: DateTime<Utc>) -> bool {
        self.status == EventStatus::Processing
            && self.processed_at.is_some_and(|at| at <= stuck_before)
    }

    /// Token for the current claim, if the event is being processed.
    pub fn claim_token(&self) -> Option<ClaimToken> {
        match (self.status, self.processed_at) {
            (EventStatus::Processing, Some(claimed_at)) => Some(ClaimToken {
                id: self.id,
                claimed_at,
            }),
            _ => None,
        }
    }

    /// Whether `token` is the live claim on this event.
    pub fn is_held_by(&self, token: &ClaimToken) -> bool {
        self.id == token.id
            && self.status == EventStatus::Processing
            && self.processed_at == Some(token.claimed_at)
    }

    /// `pending`/stuck → `processing`, stamping `processed_at`.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> ClaimToken {
        self.status = EventStatus::Processing;
        self.processed_at = Some(now);
        ClaimToken {
            id: self.id,
            claimed_at: now,
        }
    }

    /// Stuck `processing` → `processing` under a fresh claim.
    ///
    /// The lost attempt counts as a failure, so a handler that keeps taking
    /// its worker down still runs out of retries.
    pub fn mark_reclaimed(&mut self, now: DateTime<Utc>) -> ClaimToken {
        self.retry_count = self.retry_count.saturating_add(1);
        self.error_message = Some(CLAIM_EXPIRED.to_string());
        self.mark_processing(now)
    }

    /// `processing` → `completed`.
    pub fn mark_completed(&mut self) {
        self.status = EventStatus::Completed;
    }

    /// `processing` → `pending` at `next_attempt_at`.
    pub fn mark_rescheduled(
        &mut self,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: impl Into<String>,
    ) {
        self.status = EventStatus::Pending;
        self.retry_count = retry_count;
        self.scheduled_at = next_attempt_at;
        self.error_message = Some(error.into());
    }

    /// `processing` → `failed`.
    pub fn mark_failed(&mut self, retry_count: u32, error: impl Into<String>) {
        self.status = EventStatus::Failed;
        self.retry_count = retry_count;
        self.error_message = Some(error.into());
    }

    /// `processing` → `pending` without consuming an attempt.
    pub fn mark_released(&mut self) {
        self.status = EventStatus::Pending;
    }
}
