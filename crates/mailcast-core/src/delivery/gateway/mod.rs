//! ESP gateways
//!
//! A gateway translates one batch of subscribers into a single API call
//! against one email service provider and reports a normalized result.

pub mod mock;
pub mod resend;
pub mod sendgrid;

pub use mock::MockGateway;
pub use resend::ResendGateway;
pub use sendgrid::SendGridGateway;

use async_trait::async_trait;
use mailcast_common::types::{EmailAddress, ProviderFamily};
use mailcast_storage::models::{Campaign, Subscriber};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Opaque credential handle for one provider account
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Why a provider call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Provider throttled the request (HTTP 429)
    RateLimited,
    /// Credentials were rejected
    Auth,
    /// Provider refused the content or account state
    Validation,
    /// Request can never succeed, on any provider
    Malformed,
    /// Provider-side error (5xx or unexpected response)
    Provider,
    /// Transport error or timeout
    Network,
}

impl FailureKind {
    /// Transient failures worth retrying against the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Provider | FailureKind::Network)
    }

    /// Failures that must not be handed to another provider
    pub fn stops_failover(&self) -> bool {
        matches!(self, FailureKind::Malformed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Auth => "auth",
            FailureKind::Validation => "validation",
            FailureKind::Malformed => "malformed",
            FailureKind::Provider => "provider",
            FailureKind::Network => "network",
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureKind::RateLimited,
            401 | 403 => FailureKind::Auth,
            400 | 413 => FailureKind::Malformed,
            422 => FailureKind::Validation,
            _ => FailureKind::Provider,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status, when the provider answered
    pub status: Option<u16>,
}

impl SendFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Failure for a non-success HTTP response
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match extract_error_message(body) {
            Some(message) => format!("HTTP {}: {}", status, message),
            None => format!("HTTP {}", status),
        };
        Self::new(FailureKind::from_status(status), message).with_status(status)
    }

    /// Failure for a transport-level error
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(FailureKind::Network, "request timed out")
        } else {
            Self::new(FailureKind::Network, format!("request failed: {}", err))
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            FailureKind::Network,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Error bodies of the supported providers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderErrorBody {
    /// `{"errors": [{"message": "..."}]}`
    List { errors: Vec<ProviderErrorEntry> },
    /// `{"message": "...", "name": "..."}`
    Single { message: String },
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEntry {
    message: String,
}

fn extract_error_message(body: &str) -> Option<String> {
    match serde_json::from_str::<ProviderErrorBody>(body).ok()? {
        ProviderErrorBody::List { errors } => {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        ProviderErrorBody::Single { message } => Some(message),
    }
}

/// Outcome of one gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EspSendResult {
    /// The whole batch was accepted
    Sent { message_ids: Vec<String> },
    /// Nothing in the batch was accepted
    Failed(SendFailure),
}

impl EspSendResult {
    pub fn sent(message_ids: Vec<String>) -> Self {
        EspSendResult::Sent { message_ids }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        EspSendResult::Failed(SendFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EspSendResult::Sent { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, EspSendResult::Failed(f) if f.kind == FailureKind::RateLimited)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            EspSendResult::Failed(failure) => Some(&failure.message),
            EspSendResult::Sent { .. } => None,
        }
    }

    pub fn message_ids(&self) -> &[String] {
        match self {
            EspSendResult::Sent { message_ids } => message_ids,
            EspSendResult::Failed(_) => &[],
        }
    }

    /// Provider message id for the subscriber at `index` within the batch
    ///
    /// Providers that return a single id for the whole request share it
    /// across all recipients.
    pub fn message_id_for(&self, index: usize) -> Option<&str> {
        let ids = self.message_ids();
        match ids.len() {
            0 => None,
            1 => Some(ids[0].as_str()),
            _ => ids.get(index).map(String::as_str),
        }
    }
}

/// One email service provider API
#[async_trait]
pub trait EspGateway: Send + Sync {
    /// API family this gateway speaks
    fn family(&self) -> ProviderFamily;

    /// Send one batch in a single API call
    async fn send(
        &self,
        campaign: &Campaign,
        batch: &[Subscriber],
        credentials: &Credentials,
    ) -> EspSendResult;
}

/// Reject requests no provider could accept before any network call
pub(crate) fn preflight(campaign: &Campaign, batch: &[Subscriber]) -> Result<(), SendFailure> {
    if batch.is_empty() {
        return Err(SendFailure::new(FailureKind::Malformed, "empty batch"));
    }

    if EmailAddress::parse(&campaign.from_email).is_none() {
        return Err(SendFailure::new(
            FailureKind::Malformed,
            format!("invalid sender address: {}", campaign.from_email),
        ));
    }

    if campaign.subject.trim().is_empty() {
        return Err(SendFailure::new(FailureKind::Malformed, "campaign has no subject"));
    }

    if campaign.html_body.is_none() && campaign.text_body.is_none() {
        return Err(SendFailure::new(FailureKind::Malformed, "campaign has no content"));
    }

    Ok(())
}

/// Build the HTTP client shared by a gateway's requests
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}
