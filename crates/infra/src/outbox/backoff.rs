//! Retry scheduling for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential backoff: `2^retry_count * base`.
///
/// With the default 60s base, retry counts 1, 2, 3, 4 wait 2, 4, 8, 16
/// minutes. Deterministic; no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl Backoff {
    /// The exponent stops growing here; `2^32` base units is already
    /// centuries at any sane base.
    const MAX_EXPONENT: u32 = 32;

    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before the next attempt after `retry_count` failures.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry_count.min(Self::MAX_EXPONENT))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// `now + delay(retry_count)`.
    pub fn next_attempt_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(retry_count))
            .unwrap_or(chrono::TimeDelta::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
