use serde::{Deserialize, Serialize};

use leasehold_events::OutboxEvent;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Clamp a caller-supplied page size into `1..=MAX_LIMIT`.
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<OutboxEvent>,
    pub count: usize,
}

impl From<Vec<OutboxEvent>> for EventListResponse {
    fn from(events: Vec<OutboxEvent>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}
