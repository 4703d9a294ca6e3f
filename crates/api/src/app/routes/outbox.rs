//! Outbox trigger, producer and inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use leasehold_core::OutboxEventId;
use leasehold_events::{EventStatus, NewOutboxEvent};
use leasehold_infra::outbox::OutboxStore;

use crate::app::dto::{effective_limit, EventListResponse, LimitQuery, ListEventsQuery};
use crate::app::{errors, services::AppServices};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/dispatch", post(dispatch))
        .route("/events", post(enqueue_event).get(list_events))
        .route("/events/:id", get(get_event))
        .route("/due", get(list_due))
        .route("/stats", get(stats))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /outbox/dispatch
///
/// Run one dispatcher pass. Safe to call concurrently with the poller or
/// another trigger.
pub async fn dispatch(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.dispatcher.run_once().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// POST /outbox/events
pub async fn enqueue_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewOutboxEvent>,
) -> axum::response::Response {
    match services.store().enqueue(body).await {
        Ok(event) => (StatusCode::CREATED, Json(event)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /outbox/events?status=failed&limit=50
pub async fn list_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListEventsQuery>,
) -> axum::response::Response {
    let status = match query.status.as_deref().map(str::parse::<EventStatus>).transpose() {
        Ok(status) => status,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
        }
    };

    match services
        .store()
        .list_by_status(status, effective_limit(query.limit))
        .await
    {
        Ok(events) => Json(EventListResponse::from(events)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /outbox/events/:id
pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OutboxEventId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    match services.store().get(id).await {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("outbox event {id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /outbox/due?limit=50
///
/// Preview what the next run would claim. Read-only.
pub async fn list_due(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<LimitQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .map(|l| effective_limit(Some(l)))
        .unwrap_or(services.dispatcher.config().batch_limit);

    match services.store().select_due(Utc::now(), limit).await {
        Ok(events) => Json(EventListResponse::from(events)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /outbox/stats
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
