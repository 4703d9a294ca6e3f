//! Dispatcher configuration.
//!
//! Defaults: 50 events per run, 3 retries,
//! exponential backoff on a 60s base.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::outbox::Backoff;

/// Invalid dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("batch_limit must be at least 1")]
    ZeroBatchLimit,
    #[error("default_max_retries must be at least 1")]
    ZeroMaxRetries,
    #[error("base_backoff must be non-zero")]
    ZeroBackoff,
    /// A claim stays live for up to `run_budget + handler_timeout`; reclaiming
    /// any sooner would hand a running event to a second invocation.
    #[error(
        "stuck_timeout ({stuck_ms}ms) must exceed run_budget + handler_timeout ({max_claim_ms}ms)"
    )]
    StuckTimeoutTooShort { stuck_ms: u128, max_claim_ms: u128 },
}

/// Knobs for one dispatcher run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Max events claimed per invocation
    pub batch_limit: usize,
    /// Ceiling applied when a producer omits `max_retries`
    pub default_max_retries: u32,
    /// Base unit for exponential backoff
    pub base_backoff: Duration,
    /// Per-handler wall-clock limit; exceeding it counts as a failure
    pub handler_timeout: Duration,
    /// Overall wall-clock budget for one invocation
    pub run_budget: Duration,
    /// Reclaim `processing` events whose claim is older than this.
    /// `None` disables reclaim.
    pub stuck_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            default_max_retries: 3,
            base_backoff: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
            run_budget: Duration::from_secs(55),
            stuck_timeout: None,
        }
    }
}

impl DispatcherConfig {
    /// Load from `OUTBOX_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (tests, layered config sources).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            batch_limit: parse_or(&lookup, "OUTBOX_BATCH_LIMIT", defaults.batch_limit),
            default_max_retries: parse_or(
                &lookup,
                "OUTBOX_DEFAULT_MAX_RETRIES",
                defaults.default_max_retries,
            ),
            base_backoff: secs_or(&lookup, "OUTBOX_BASE_BACKOFF_SECS", defaults.base_backoff),
            handler_timeout: secs_or(
                &lookup,
                "OUTBOX_HANDLER_TIMEOUT_SECS",
                defaults.handler_timeout,
            ),
            run_budget: secs_or(&lookup, "OUTBOX_RUN_BUDGET_SECS", defaults.run_budget),
            stuck_timeout: lookup("OUTBOX_STUCK_TIMEOUT_SECS")
                .and_then(|raw| parse_value::<u64>("OUTBOX_STUCK_TIMEOUT_SECS", &raw))
                .map(Duration::from_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 {
            return Err(ConfigError::ZeroBatchLimit);
        }
        if self.default_max_retries == 0 {
            return Err(ConfigError::ZeroMaxRetries);
        }
        if self.base_backoff.is_zero() {
            return Err(ConfigError::ZeroBackoff);
        }
        if let Some(stuck) = self.stuck_timeout {
            let max_claim = self.max_claim_duration();
            if stuck <= max_claim {
                return Err(ConfigError::StuckTimeoutTooShort {
                    stuck_ms: stuck.as_millis(),
                    max_claim_ms: max_claim.as_millis(),
                });
            }
        }
        Ok(())
    }

    /// Longest a claim can stay live: the last event may start just before
    /// the run budget expires and then use its full handler timeout.
    pub fn max_claim_duration(&self) -> Duration {
        self.run_budget.saturating_add(self.handler_timeout)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_backoff)
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_default_max_retries(mut self, max: u32) -> Self {
        self.default_max_retries = max;
        self
    }

    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    pub fn with_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = Some(timeout);
        self
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = raw, "ignoring unparsable config value");
            None
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|raw| parse_value(key, &raw))
        .unwrap_or(default)
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|raw| parse_value::<u64>(key, &raw))
        .map(Duration::from_secs)
        .unwrap_or(default)
}
