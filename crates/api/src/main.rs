use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use leasehold_api::app::{build_app, services};
use leasehold_api::settings::ServerSettings;
use leasehold_infra::workers::OutboxPoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    leasehold_observability::init();

    let settings = ServerSettings::from_env();
    settings
        .dispatcher
        .validate()
        .context("invalid outbox configuration")?;

    let services = Arc::new(services::build_services(&settings).await?);

    let poller = settings
        .poll_interval
        .map(|interval| OutboxPoller::spawn(services.dispatcher.clone(), interval));

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(poller) = poller {
        poller.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
