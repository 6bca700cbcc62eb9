//! Health check and metrics handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status
    pub status: String,
    /// Campaigns currently being delivered
    pub deliveries_in_flight: usize,
}

/// Basic health check
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        deliveries_in_flight: state.orchestrator.in_flight().len(),
    })
}

/// Liveness check (is the process running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check (is the service ready to accept requests)
pub async fn readiness(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if let Some(db_pool) = &state.db_pool {
        db_pool
            .health_check()
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    }

    if !state.orchestrator.registry().has_active() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(StatusCode::OK)
}

/// Prometheus metrics in the text exposition format
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.orchestrator.metrics().render(),
    )
}
