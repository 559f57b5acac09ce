//! Health endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Liveness check for the API process
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "relaypool",
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}

/// Latest probe state of every monitored proxy
pub async fn health_report(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.health_report())
}

/// Ids of proxies whose last probe failed
pub async fn unhealthy_ids(State(state): State<AppState>) -> impl IntoResponse {
    let ids = state.pool.unhealthy_ids();
    Json(json!({
        "count": ids.len(),
        "ids": ids,
    }))
}
