//! ESP provider handlers

use axum::{extract::State, Json};
use mailcast_core::delivery::EspProviderInfo;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProviderListResponse {
    pub data: Vec<EspProviderInfo>,
    pub total: usize,
}

/// Configured providers in selection order, with remaining quota
pub async fn list_providers(State(state): State<AppState>) -> Json<ProviderListResponse> {
    let data = state.orchestrator.get_active_esp_configuration().await;
    Json(ProviderListResponse {
        total: data.len(),
        data,
    })
}
