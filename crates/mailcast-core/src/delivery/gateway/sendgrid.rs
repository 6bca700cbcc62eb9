//! SendGrid gateway
//!
//! Sends a whole batch through the v3 mail endpoint with one personalization
//! block per recipient. SendGrid answers with a single `X-Message-Id` shared
//! by every recipient of the request.

use super::{http_client, preflight, Credentials, EspGateway, EspSendResult, SendFailure};
use async_trait::async_trait;
use mailcast_common::types::ProviderFamily;
use mailcast_storage::models::{Campaign, Subscriber};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

/// SendGrid API base URL
const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

/// SendGrid gateway
pub struct SendGridGateway {
    base_url: String,
    client: Client,
}

impl SendGridGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: SENDGRID_API_URL.to_string(),
            client: http_client(timeout),
        }
    }

    /// Point the gateway at another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(campaign: &Campaign, batch: &[Subscriber]) -> SendGridRequest {
        let personalizations = batch
            .iter()
            .map(|subscriber| {
                let mut custom_args = BTreeMap::new();
                custom_args.insert("campaign_id", campaign.id.to_string());
                custom_args.insert("subscriber_id", subscriber.id.to_string());

                Personalization {
                    to: vec![Address {
                        email: subscriber.email.clone(),
                        name: subscriber.full_name(),
                    }],
                    custom_args,
                }
            })
            .collect();

        let mut content = Vec::new();
        if let Some(text) = &campaign.text_body {
            content.push(Content {
                content_type: "text/plain",
                value: text.clone(),
            });
        }
        if let Some(html) = &campaign.html_body {
            content.push(Content {
                content_type: "text/html",
                value: html.clone(),
            });
        }

        SendGridRequest {
            personalizations,
            from: Address {
                email: campaign.from_email.clone(),
                name: campaign.from_name.clone(),
            },
            reply_to: campaign.reply_to.as_ref().map(|email| Address {
                email: email.clone(),
                name: None,
            }),
            subject: campaign.subject.clone(),
            content,
        }
    }
}

/// SendGrid API request payload
#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address>,
    subject: String,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<Address>,
    custom_args: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
struct Address {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: String,
}

#[async_trait]
impl EspGateway for SendGridGateway {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::SendGrid
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

        let request = Self::build_request(campaign, batch);

        debug!(
            campaign_id = %campaign.id,
            recipients = batch.len(),
            "Sending batch via SendGrid"
        );

        let response = match self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
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
            let message_ids = response
                .headers()
                .get("X-Message-Id")
                .and_then(|v| v.to_str().ok())
                .map(|id| vec![id.to_string()])
                .unwrap_or_default();

            EspSendResult::sent(message_ids)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "SendGrid API error");
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
        campaign.text_body = Some("Hello".to_string());
        campaign.html_body = Some("<p>Hello</p>".to_string());
        campaign
    }

    fn batch(n: usize) -> Vec<Subscriber> {
        let list = Uuid::new_v4();
        (0..n)
            .map(|i| Subscriber::active(list, format!("user{}@example.com", i)))
            .collect()
    }

    fn gateway(server: &MockServer) -> SendGridGateway {
        SendGridGateway::new(Duration::from_secs(5)).with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_send_reads_message_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("Authorization", "Bearer SG.test"))
            .respond_with(ResponseTemplate::new(202).insert_header("X-Message-Id", "sg-abc"))
            .expect(1)
            .mount(&server)
            .await;

        let result = gateway(&server)
            .send(&campaign(), &batch(3), &Credentials::new("SG.test"))
            .await;

        assert!(result.is_success());
        assert_eq!(result.message_id_for(2), Some("sg-abc"));
    }

    #[test]
    fn test_one_personalization_per_recipient() {
        let campaign = campaign();
        let subscribers = batch(2);
        let body = serde_json::to_value(SendGridGateway::build_request(&campaign, &subscribers))
            .unwrap();

        let personalizations = body["personalizations"].as_array().unwrap();
        assert_eq!(personalizations.len(), 2);
        assert_eq!(personalizations[1]["to"][0]["email"], "user1@example.com");
        assert_eq!(
            personalizations[1]["custom_args"]["subscriber_id"],
            subscribers[1].id.to_string()
        );
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = gateway(&server)
            .send(&campaign(), &batch(1), &Credentials::new("SG.test"))
            .await;

        match result {
            EspSendResult::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Provider);
                assert_eq!(failure.status, Some(503));
                assert!(failure.kind.is_retryable());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let gateway = SendGridGateway::new(Duration::from_millis(50)).with_base_url(server.uri());
        let result = gateway
            .send(&campaign(), &batch(1), &Credentials::new("SG.test"))
            .await;

        match result {
            EspSendResult::Failed(failure) => assert_eq!(failure.kind, FailureKind::Network),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
