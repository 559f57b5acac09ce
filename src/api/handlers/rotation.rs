//! Rotation handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::PoolError;

/// Run a rotation now; 409 if one is already in progress
pub async fn force_rotation(State(state): State<AppState>) -> Result<impl IntoResponse, PoolError> {
    let report = state.pool.force_rotation_now().await?;
    let status = if report.is_skipped() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

pub async fn rotation_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.rotation().status())
}
