//! API route definitions

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, state::AppState};

/// Create the health router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/", get(handlers::probe))
        .fallback(get(handlers::probe))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
