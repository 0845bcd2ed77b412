//! Request handlers

use axum::{extract::State, http::Uri, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::state::AppState;

/// Liveness probe: any `GET` answers `OK`
pub async fn probe(State(state): State<Arc<AppState>>, uri: Uri) -> &'static str {
    if state.should_log_probe(Utc::now().timestamp()) {
        info!(path = %uri.path(), "Health probe received");
    }
    "OK"
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}
