//! Process-level settings for the API binary.

use std::time::Duration;

use tracing::warn;

use leasehold_infra::DispatcherConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
    /// Postgres when set, in-memory otherwise.
    pub database_url: Option<String>,
    /// Starts an in-process poller when set.
    pub poll_interval: Option<Duration>,
    pub dispatcher: DispatcherConfig,
}

impl ServerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| {
            warn!("BIND_ADDR not set; using {DEFAULT_BIND_ADDR}");
            DEFAULT_BIND_ADDR.to_string()
        });

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let poll_interval = lookup("OUTBOX_POLL_INTERVAL_SECS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(0) => {
                    warn!("OUTBOX_POLL_INTERVAL_SECS is 0; poller disabled");
                    None
                }
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "ignoring unparsable OUTBOX_POLL_INTERVAL_SECS");
                    None
                }
            }
        });

        let dispatcher = DispatcherConfig::from_lookup(&lookup);

        Self {
            bind_addr,
            database_url,
            poll_interval,
            dispatcher,
        }
    }
}
