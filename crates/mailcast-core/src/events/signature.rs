//! Webhook signature verification
//!
//! Resend signs webhooks the Svix way: HMAC-SHA256 over
//! `{svix-id}.{svix-timestamp}.{body}` keyed with the base64 part of a
//! `whsec_` secret, sent as space-separated `v1,<base64>` entries.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between the signer and us
const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid webhook secret")]
    InvalidSecret,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("timestamp outside tolerance")]
    Expired,

    #[error("no matching signature")]
    Mismatch,
}

/// Signature headers of one webhook delivery
#[derive(Debug, Clone, Copy)]
pub struct SignatureHeaders<'a> {
    pub id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

fn secret_key(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
    BASE64
        .decode(encoded)
        .map_err(|_| SignatureError::InvalidSecret)
}

fn mac_for(key: &[u8], id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Verify a webhook delivery against `secret` at instant `now`
pub fn verify_webhook_signature(
    secret: &str,
    headers: SignatureHeaders<'_>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let id = headers.id.ok_or(SignatureError::MissingHeader("svix-id"))?;
    let timestamp = headers
        .timestamp
        .ok_or(SignatureError::MissingHeader("svix-timestamp"))?;
    let signatures = headers
        .signature
        .ok_or(SignatureError::MissingHeader("svix-signature"))?;

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if (now.timestamp() - sent_at).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let key = secret_key(secret)?;

    for entry in signatures.split_whitespace() {
        let Some(("v1", encoded)) = entry.split_once(',') else {
            continue;
        };
        let Ok(expected) = BASE64.decode(encoded) else {
            continue;
        };
        if mac_for(&key, id, timestamp, body)?
            .verify_slice(&expected)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

/// Produce a `v1,<base64>` signature entry
pub fn sign_webhook(
    secret: &str,
    id: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, SignatureError> {
    let key = secret_key(secret)?;
    let mac = mac_for(&key, id, &timestamp.to_string(), body)?;
    Ok(format!("v1,{}", BASE64.encode(mac.finalize().into_bytes())))
}
