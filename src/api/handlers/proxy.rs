//! Selection handlers

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::OperationType;
use crate::services::Selection;

/// Query parameters for proxy selection
#[derive(Debug, Deserialize, Default)]
pub struct ProxyQuery {
    pub operation: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProxyResponse {
    #[serde(flatten)]
    selection: Selection,
    url: String,
}

/// Pick a proxy for an operation
pub async fn get_proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<impl IntoResponse, PoolError> {
    let operation = OperationType::from_str(query.operation.as_deref().unwrap_or_default());
    let country = query.country.as_deref().filter(|c| !c.trim().is_empty());

    let selection = state.pool.select(operation, country).await?;
    let url = selection.config.url()?;

    Ok(Json(ProxyResponse { selection, url }))
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub success: bool,
}

/// Advisory usage feedback for a proxy
pub async fn report_outcome(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<OutcomeRequest>,
) -> Result<impl IntoResponse, PoolError> {
    let record = state.pool.report_outcome(id, req.success).await?;
    Ok(Json(record))
}
