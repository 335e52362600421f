//! HTTP router.

use crate::handlers;
use crate::state::AppContext;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Compose the order API.
///
/// # Routes
///
/// - `POST /orders` - submit an order
/// - `GET /orders/:id` - read an order and its items
/// - `GET /health` - liveness
/// - `GET /ready` - readiness
pub fn router(saga: AppContext) -> Router {
    Router::new()
        .route("/orders", post(handlers::submit_order))
        .route("/orders/:id", get(handlers::get_order))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .layer(TraceLayer::new_for_http())
        .with_state(saga)
}
