//! API route definitions

use axum::routing::{get, post, put};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Selection
        .route("/proxy", get(handlers::proxy::get_proxy))
        .route("/proxies/:id/outcome", post(handlers::proxy::report_outcome))
        // Health monitor
        .route("/health/report", get(handlers::health::health_report))
        .route("/health/unhealthy", get(handlers::health::unhealthy_ids))
        // Rotation
        .route("/rotation/force", post(handlers::rotation::force_rotation))
        .route("/rotation/status", get(handlers::rotation::rotation_status))
        // Policies
        .route("/policies", get(handlers::policy::list_policies))
        .route(
            "/policies/:operation/strategy",
            put(handlers::policy::set_strategy),
        )
        // Stats
        .route("/stats/countries", get(handlers::stats::country_counts))
}
