use axum::Router;

pub mod outbox;
pub mod system;

/// Router for all outbox endpoints.
pub fn router() -> Router {
    Router::new().nest("/outbox", outbox::router())
}
