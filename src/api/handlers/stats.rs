//! Pool statistics

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::server::AppState;
use crate::error::PoolError;

/// Active proxies per country code
pub async fn country_counts(State(state): State<AppState>) -> Result<impl IntoResponse, PoolError> {
    let counts = state.pool.country_counts().await?;
    Ok(Json(counts))
}
