//! Campaign delivery handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mailcast_core::DeliveryStatus;
use mailcast_storage::DeliveryReport;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{delivery_error, internal_error, not_found, storage_error, ApiError};
use crate::state::AppState;

/// Response to an accepted abort request
#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub campaign_id: Uuid,
    pub aborting: bool,
}

/// Deliver a draft campaign and return its final status
///
/// The delivery runs on its own task, so a client hanging up does not stop
/// it halfway through a batch.
pub async fn deliver_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<DeliveryStatus>, ApiError> {
    info!(campaign_id = %campaign_id, "Delivery requested");

    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.deliver_campaign(campaign_id).await });

    match handle.await {
        Ok(Ok(status)) => Ok(Json(status)),
        Ok(Err(e)) => Err(delivery_error(e)),
        Err(e) => {
            error!(campaign_id = %campaign_id, "Delivery task failed: {}", e);
            Err(internal_error("Delivery task failed"))
        }
    }
}

/// Delivery status of a campaign, live or from its last report
pub async fn get_delivery_status(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<DeliveryStatus>, ApiError> {
    state
        .orchestrator
        .get_campaign_delivery_status(campaign_id)
        .await
        .map_err(storage_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("No delivery status for campaign {}", campaign_id)))
}

/// Delivery report of a campaign
pub async fn get_report(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<DeliveryReport>, ApiError> {
    state
        .orchestrator
        .get_campaign_report(campaign_id)
        .await
        .map_err(storage_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("No delivery report for campaign {}", campaign_id)))
}

/// Ask a running delivery to stop
pub async fn abort_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<(StatusCode, Json<AbortResponse>), ApiError> {
    if !state.orchestrator.abort_campaign(campaign_id) {
        return Err(not_found(format!(
            "Campaign {} is not being delivered",
            campaign_id
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AbortResponse {
            campaign_id,
            aborting: true,
        }),
    ))
}
