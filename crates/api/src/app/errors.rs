use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use leasehold_infra::outbox::{DispatchError, OutboxStoreError};

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Store(e) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            e.to_string(),
        ),
    }
}

pub fn store_error_to_response(err: OutboxStoreError) -> axum::response::Response {
    match err {
        OutboxStoreError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        OutboxStoreError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("outbox event {id} not found"),
        ),
        OutboxStoreError::StaleClaim(id) => json_error(
            StatusCode::CONFLICT,
            "stale_claim",
            format!("claim on outbox event {id} is no longer held"),
        ),
        OutboxStoreError::Storage(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
