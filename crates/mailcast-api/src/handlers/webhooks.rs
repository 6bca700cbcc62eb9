//! Inbound ESP webhook handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use mailcast_common::types::ProviderFamily;
use mailcast_core::delivery::WebhookOutcome;
use mailcast_core::events::{verify_webhook_signature, SignatureHeaders};
use tracing::{debug, warn};

use crate::error::{api_error, not_found, ApiError};
use crate::state::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Check the Svix signature of a Resend webhook
///
/// Passes when no Resend provider has a webhook secret configured, or when
/// the body is signed with any configured secret.
fn verify_resend(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let registry = state.orchestrator.registry();
    let secrets: Vec<&str> = registry
        .by_family(ProviderFamily::Resend)
        .filter_map(|p| p.webhook_secret.as_deref())
        .collect();

    if secrets.is_empty() {
        return Ok(());
    }

    let signature = SignatureHeaders {
        id: header(headers, "svix-id"),
        timestamp: header(headers, "svix-timestamp"),
        signature: header(headers, "svix-signature"),
    };
    let now = Utc::now();

    let mut last_error = None;
    for secret in secrets {
        match verify_webhook_signature(secret, signature, body, now) {
            Ok(()) => return Ok(()),
            Err(e) => last_error = Some(e),
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    warn!(reason = %reason, "Rejecting webhook with invalid signature");
    Err(api_error(
        StatusCode::UNAUTHORIZED,
        "INVALID_SIGNATURE",
        format!("Webhook signature rejected: {}", reason),
    ))
}

/// Receive provider events
///
/// Known providers always get 202, even when some events were dropped, so
/// they do not keep redelivering payloads we cannot use.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookOutcome>), ApiError> {
    let family: ProviderFamily = provider
        .parse()
        .map_err(|_| not_found(format!("Unknown provider: {}", provider)))?;

    // SendGrid signs with ECDSA; only Svix HMAC signatures are checked
    if family == ProviderFamily::Resend {
        verify_resend(&state, &headers, &body)?;
    }

    let outcome = state.orchestrator.handle_webhook_event(family, &body).await;
    debug!(
        provider = %family,
        accepted = outcome.accepted,
        dropped = outcome.dropped,
        "Webhook processed"
    );

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}
