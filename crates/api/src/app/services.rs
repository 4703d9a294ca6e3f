//! Store, registry and dispatcher wiring.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use leasehold_events::HandlerRegistry;
use leasehold_infra::outbox::{Dispatcher, InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use leasehold_infra::{ConfigError, DispatcherConfig};
use leasehold_notifications::{register_defaults, InMemoryNotificationStore, NoopPushGateway};

use crate::settings::ServerSettings;

/// Outbox backend selected at startup.
pub type SharedOutboxStore = Arc<dyn OutboxStore>;

/// Everything the HTTP handlers need.
pub struct AppServices {
    pub dispatcher: Arc<Dispatcher<SharedOutboxStore>>,
    pub notifications: Arc<InMemoryNotificationStore>,
}

impl AppServices {
    pub fn store(&self) -> &SharedOutboxStore {
        self.dispatcher.store()
    }
}

/// Wire services against an already-built outbox store.
pub fn services_with_store(
    store: SharedOutboxStore,
    config: DispatcherConfig,
) -> Result<AppServices, ConfigError> {
    let notifications = Arc::new(InMemoryNotificationStore::new());

    let mut registry = HandlerRegistry::new();
    register_defaults(
        &mut registry,
        notifications.clone(),
        Arc::new(NoopPushGateway),
    );

    Ok(AppServices {
        dispatcher: Arc::new(Dispatcher::new(store, registry, config)?),
        notifications,
    })
}

/// In-memory wiring (dev, tests).
pub fn in_memory_services(config: DispatcherConfig) -> Result<AppServices, ConfigError> {
    services_with_store(InMemoryOutboxStore::arc(), config)
}

/// Build services from process settings: Postgres when `DATABASE_URL` is
/// set, in-memory otherwise.
pub async fn build_services(settings: &ServerSettings) -> anyhow::Result<AppServices> {
    let Some(url) = settings.database_url.as_deref() else {
        info!("DATABASE_URL not set; using in-memory outbox");
        return Ok(in_memory_services(settings.dispatcher.clone())?);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresOutboxStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to apply outbox schema")?;
    info!("using Postgres outbox");

    Ok(services_with_store(Arc::new(store), settings.dispatcher.clone())?)
}
