//! Resend gateway
//!
//! Uses the batch endpoint: one message object per recipient, all in one
//! request. The response lists one message id per object, in order.

use super::{http_client, preflight, Credentials, EspGateway, EspSendResult, SendFailure};
use async_trait::async_trait;
use mailcast_common::types::ProviderFamily;
use mailcast_storage::models::{Campaign, Subscriber};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Resend API base URL
const RESEND_API_URL: &str = "https://api.resend.com";

/// Largest batch the endpoint accepts
pub const RESEND_MAX_BATCH: usize = 100;

/// Resend batch gateway
pub struct ResendGateway {
    base_url: String,
    client: Client,
}

impl ResendGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: RESEND_API_URL.to_string(),
            client: http_client(timeout),
        }
    }

    /// Point the gateway at another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(campaign: &Campaign, batch: &[Subscriber]) -> Vec<ResendEmail> {
        batch
            .iter()
            .map(|subscriber| ResendEmail {
                from: campaign.sender(),
                to: vec![subscriber.email.clone()],
                subject: campaign.subject.clone(),
                html: campaign.html_body.clone(),
                text: campaign.text_body.clone(),
                reply_to: campaign.reply_to.clone(),
                tags: vec![
                    ResendTag::new("campaign_id", campaign.id.to_string()),
                    ResendTag::new("subscriber_id", subscriber.id.to_string()),
                ],
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ResendEmail {
    from: String,
    to: Vec<String>,
    subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    tags: Vec<ResendTag>,
}

#[derive(Debug, Serialize)]
struct ResendTag {
    name: &'static str,
    value: String,
}

impl ResendTag {
    fn new(name: &'static str, value: String) -> Self {
        Self { name, value }
    }
}

#[derive(Debug, Deserialize)]
struct ResendBatchResponse {
    data: Vec<ResendCreated>,
}

#[derive(Debug, Deserialize)]
struct ResendCreated {
    id: String,
}

#[async_trait]
impl EspGateway for ResendGateway {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Resend
    }

    async fn send(
        &self,
        campaign: &Campaign,
        batch: &[Subscriber],
        credentials: &Credentials,
    ) -> EspSendResult {
        if let Err(failure) = preflight(campaign, batch) {
            return EspSendResult::Failed(failure);
        }

        if batch.len() > RESEND_MAX_BATCH {
            return EspSendResult::Failed(SendFailure::new(
                super::FailureKind::Malformed,
                format!(
                    "batch of {} exceeds the Resend limit of {}",
                    batch.len(),
                    RESEND_MAX_BATCH
                ),
            ));
        }

        let request = Self::build_request(campaign, batch);

        debug!(
            campaign_id = %campaign.id,
            recipients = batch.len(),
            "Sending batch via Resend"
        );

        let response = match self
            .client
            .post(format!("{}/emails/batch", self.base_url))
            .header("Authorization", credentials.bearer())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return EspSendResult::Failed(SendFailure::from_transport(&e)),
        };

        let status = response.status();

        if status.is_success() {
            match response.json::<ResendBatchResponse>().await {
                Ok(body) => EspSendResult::sent(body.data.into_iter().map(|c| c.id).collect()),
                Err(e) => {
                    // Accepted but unreadable; the batch was still sent
                    error!(error = %e, "Unexpected Resend batch response");
                    EspSendResult::sent(Vec::new())
                }
            }
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "Resend API error");
            EspSendResult::Failed(SendFailure::from_response(status.as_u16(), &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::gateway::FailureKind;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn campaign() -> Campaign {
        let mut campaign = Campaign::draft("Launch", "Hello", "news@example.com", vec![]);
        campaign.html_body = Some("<p>Hello</p>".to_string());
        campaign
    }

    fn batch(n: usize) -> Vec<Subscriber> {
        let list = Uuid::new_v4();
        (0..n)
            .map(|i| Subscriber::active(list, format!("user{}@example.com", i)))
            .collect()
    }

    fn gateway(server: &MockServer) -> ResendGateway {
        ResendGateway::new(Duration::from_secs(5)).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_batch_send_returns_ids_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails/batch"))
            .and(header("Authorization", "Bearer re_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "msg-1"}, {"id": "msg-2"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = gateway(&server)
            .send(&campaign(), &batch(2), &Credentials::new("re_test"))
            .await;

        assert_eq!(
            result,
            EspSendResult::sent(vec!["msg-1".to_string(), "msg-2".to_string()])
        );
    }

    #[tokio::test]
    async fn test_request_body_carries_correlation_tags() {
        let campaign = campaign();
        let subscribers = batch(1);
        let request = ResendGateway::build_request(&campaign, &subscribers);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body[0]["to"][0], "user0@example.com");
        assert_eq!(body[0]["tags"][0]["value"], campaign.id.to_string());
        assert_eq!(body[0]["tags"][1]["value"], subscribers[0].id.to_string());
        assert!(body[0].get("text").is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "statusCode": 429,
                "message": "Too many requests",
                "name": "rate_limit_exceeded"
            })))
            .mount(&server)
            .await;

        let result = gateway(&server)
            .send(&campaign(), &batch(3), &Credentials::new("re_test"))
            .await;

        assert!(result.is_rate_limited());
        assert_eq!(result.error(), Some("HTTP 429: Too many requests"));
    }

    #[tokio::test]
    async fn test_oversized_batch_is_malformed() {
        let server = MockServer::start().await;
        let result = gateway(&server)
            .send(&campaign(), &batch(101), &Credentials::new("re_test"))
            .await;

        match result {
            EspSendResult::Failed(failure) => assert_eq!(failure.kind, FailureKind::Malformed),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
