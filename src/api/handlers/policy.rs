//! Selection policy handlers

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::OperationType;

/// Current policy for every operation type, keyed by operation name
pub async fn list_policies(State(state): State<AppState>) -> Result<impl IntoResponse, PoolError> {
    let mut policies = Map::new();
    for (operation, policy) in state.pool.policies().entries() {
        let value = serde_json::to_value(policy).map_err(|e| PoolError::Internal(e.to_string()))?;
        policies.insert(operation.as_str().to_string(), value);
    }
    Ok(Json(Value::Object(policies)))
}

#[derive(Debug, Deserialize)]
pub struct SetStrategyRequest {
    pub strategy: String,
}

/// Change the strategy of one operation type.
///
/// Unknown strategy names fall back to random; unknown operations are rejected.
pub async fn set_strategy(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Json(req): Json<SetStrategyRequest>,
) -> Result<impl IntoResponse, PoolError> {
    let operation = OperationType::parse(&operation)
        .ok_or_else(|| PoolError::InvalidRequest(format!("unknown operation type: {}", operation)))?;

    let strategy = state.pool.set_strategy(operation, &req.strategy);

    Ok(Json(json!({
        "operation": operation,
        "strategy": strategy,
    })))
}
