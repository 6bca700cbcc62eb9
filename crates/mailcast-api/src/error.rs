//! API error responses

use axum::{http::StatusCode, Json};
use mailcast_core::DeliveryError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
}

impl From<mailcast_common::Error> for ErrorResponse {
    fn from(e: mailcast_common::Error) -> Self {
        Self {
            error: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Map a storage error onto its HTTP status
pub fn storage_error(e: mailcast_common::Error) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Storage error: {}", e);
    }
    (status, Json(ErrorResponse::from(e)))
}

/// Map a delivery error onto its HTTP status
pub fn delivery_error(e: DeliveryError) -> ApiError {
    let message = e.to_string();
    match e {
        DeliveryError::CampaignNotFound(_) => not_found(message),
        DeliveryError::NoEligibleSubscribers(_) | DeliveryError::NoActiveProviders => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
        }
        DeliveryError::AlreadySending(_) | DeliveryError::NotDeliverable { .. } => {
            api_error(StatusCode::CONFLICT, "CONFLICT", message)
        }
        DeliveryError::Storage(e) => storage_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailcast_common::types::CampaignStatus;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_delivery_error_status_codes() {
        let id = Uuid::new_v4();
        let cases = [
            (DeliveryError::CampaignNotFound(id), StatusCode::NOT_FOUND),
            (
                DeliveryError::NoEligibleSubscribers(id),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DeliveryError::NoActiveProviders, StatusCode::UNPROCESSABLE_ENTITY),
            (DeliveryError::AlreadySending(id), StatusCode::CONFLICT),
            (
                DeliveryError::NotDeliverable {
                    id,
                    status: CampaignStatus::Sent,
                },
                StatusCode::CONFLICT,
            ),
            (
                DeliveryError::Storage(mailcast_common::Error::Database("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(delivery_error(error).0, expected);
        }
    }
}
