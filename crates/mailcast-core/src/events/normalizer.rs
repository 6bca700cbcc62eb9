//! Event Normalizer - Provider webhook payloads to canonical delivery events
//!
//! The provider is chosen explicitly by the caller (the webhook route it
//! arrived on), never guessed from the payload's shape.

use chrono::{DateTime, TimeZone, Utc};
use mailcast_common::types::{DeliveryEventType, ProviderFamily};
use mailcast_storage::models::DeliveryEvent;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Reasons a webhook payload cannot become a canonical event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnrecognizedPayload {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("{family} payload has an unexpected shape: {reason}")]
    Shape {
        family: ProviderFamily,
        reason: String,
    },

    #[error("unknown {family} event: {name}")]
    UnknownEvent { family: ProviderFamily, name: String },

    #[error("{family} event {name} has no canonical equivalent")]
    Unmapped { family: ProviderFamily, name: String },

    #[error("{family} event carries no campaign/subscriber correlation")]
    MissingCorrelation { family: ProviderFamily },
}

impl UnrecognizedPayload {
    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            UnrecognizedPayload::InvalidJson(_) => "invalid_json",
            UnrecognizedPayload::Shape { .. } => "shape",
            UnrecognizedPayload::UnknownEvent { .. } => "unknown_event",
            UnrecognizedPayload::Unmapped { .. } => "unmapped",
            UnrecognizedPayload::MissingCorrelation { .. } => "missing_correlation",
        }
    }
}

/// Resend webhook event names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendEventName {
    Sent,
    Delivered,
    DeliveryDelayed,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Failed,
}

impl FromStr for ResendEventName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email.sent" => Ok(ResendEventName::Sent),
            "email.delivered" => Ok(ResendEventName::Delivered),
            "email.delivery_delayed" => Ok(ResendEventName::DeliveryDelayed),
            "email.opened" => Ok(ResendEventName::Opened),
            "email.clicked" => Ok(ResendEventName::Clicked),
            "email.bounced" => Ok(ResendEventName::Bounced),
            "email.complained" => Ok(ResendEventName::Complained),
            "email.failed" => Ok(ResendEventName::Failed),
            _ => Err(()),
        }
    }
}

impl ResendEventName {
    pub fn canonical(self) -> Option<DeliveryEventType> {
        match self {
            ResendEventName::Sent => Some(DeliveryEventType::Sent),
            ResendEventName::Delivered => Some(DeliveryEventType::Delivered),
            ResendEventName::DeliveryDelayed => None,
            ResendEventName::Opened => Some(DeliveryEventType::Opened),
            ResendEventName::Clicked => Some(DeliveryEventType::Clicked),
            ResendEventName::Bounced => Some(DeliveryEventType::Bounced),
            ResendEventName::Complained => Some(DeliveryEventType::Complained),
            ResendEventName::Failed => Some(DeliveryEventType::Failed),
        }
    }
}

/// SendGrid event webhook names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendGridEventName {
    Processed,
    Deferred,
    Delivered,
    Open,
    Click,
    Bounce,
    Dropped,
    SpamReport,
    Unsubscribe,
    GroupUnsubscribe,
    GroupResubscribe,
}

impl FromStr for SendGridEventName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(SendGridEventName::Processed),
            "deferred" => Ok(SendGridEventName::Deferred),
            "delivered" => Ok(SendGridEventName::Delivered),
            "open" => Ok(SendGridEventName::Open),
            "click" => Ok(SendGridEventName::Click),
            "bounce" => Ok(SendGridEventName::Bounce),
            "dropped" => Ok(SendGridEventName::Dropped),
            "spamreport" => Ok(SendGridEventName::SpamReport),
            "unsubscribe" => Ok(SendGridEventName::Unsubscribe),
            "group_unsubscribe" => Ok(SendGridEventName::GroupUnsubscribe),
            "group_resubscribe" => Ok(SendGridEventName::GroupResubscribe),
            _ => Err(()),
        }
    }
}

impl SendGridEventName {
    pub fn canonical(self) -> Option<DeliveryEventType> {
        match self {
            SendGridEventName::Processed => Some(DeliveryEventType::Sent),
            SendGridEventName::Deferred => None,
            SendGridEventName::Delivered => Some(DeliveryEventType::Delivered),
            SendGridEventName::Open => Some(DeliveryEventType::Opened),
            SendGridEventName::Click => Some(DeliveryEventType::Clicked),
            SendGridEventName::Bounce => Some(DeliveryEventType::Bounced),
            SendGridEventName::Dropped => Some(DeliveryEventType::Failed),
            SendGridEventName::SpamReport => Some(DeliveryEventType::Complained),
            SendGridEventName::Unsubscribe | SendGridEventName::GroupUnsubscribe => {
                Some(DeliveryEventType::Unsubscribed)
            }
            SendGridEventName::GroupResubscribe => None,
        }
    }
}

/// Resend webhook envelope
#[derive(Debug, Deserialize)]
struct ResendWebhook {
    #[serde(rename = "type")]
    event_type: String,
    created_at: DateTime<Utc>,
    data: ResendEventData,
}

#[derive(Debug, Deserialize)]
struct ResendEventData {
    email_id: Option<String>,
    #[serde(default)]
    tags: Option<ResendTags>,
}

/// Resend reports tags either as a map or as a list of name/value pairs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResendTags {
    Map(HashMap<String, String>),
    List(Vec<ResendTag>),
}

#[derive(Debug, Deserialize)]
struct ResendTag {
    name: String,
    value: String,
}

impl ResendTags {
    fn get(&self, key: &str) -> Option<&str> {
        match self {
            ResendTags::Map(map) => map.get(key).map(String::as_str),
            ResendTags::List(list) => list
                .iter()
                .find(|t| t.name == key)
                .map(|t| t.value.as_str()),
        }
    }
}

/// One SendGrid event; custom args appear as top-level fields
#[derive(Debug, Deserialize)]
struct SendGridEvent {
    event: String,
    timestamp: i64,
    sg_message_id: Option<String>,
    campaign_id: Option<String>,
    subscriber_id: Option<String>,
}

/// Maps provider webhook payloads to canonical events
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw webhook body into one result per contained event
    ///
    /// SendGrid posts arrays of events; each element is normalized on its
    /// own so one bad element does not drop its neighbours.
    pub fn normalize_body(
        &self,
        family: ProviderFamily,
        body: &[u8],
    ) -> Vec<Result<DeliveryEvent, UnrecognizedPayload>> {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(items)) => items
                .iter()
                .map(|item| self.normalize(family, item))
                .collect(),
            Ok(value) => vec![self.normalize(family, &value)],
            Err(e) => vec![Err(UnrecognizedPayload::InvalidJson(e.to_string()))],
        }
    }

    /// Normalize a single provider event
    pub fn normalize(
        &self,
        family: ProviderFamily,
        raw: &Value,
    ) -> Result<DeliveryEvent, UnrecognizedPayload> {
        match family {
            ProviderFamily::Resend => normalize_resend(raw),
            ProviderFamily::SendGrid => normalize_sendgrid(raw),
        }
    }
}

fn shape(family: ProviderFamily, err: serde_json::Error) -> UnrecognizedPayload {
    UnrecognizedPayload::Shape {
        family,
        reason: err.to_string(),
    }
}

fn parse_id(value: Option<&str>) -> Option<Uuid> {
    value.and_then(|v| Uuid::parse_str(v).ok())
}

fn normalize_resend(raw: &Value) -> Result<DeliveryEvent, UnrecognizedPayload> {
    let family = ProviderFamily::Resend;
    let webhook = ResendWebhook::deserialize(raw).map_err(|e| shape(family, e))?;

    let name: ResendEventName =
        webhook
            .event_type
            .parse()
            .map_err(|_| UnrecognizedPayload::UnknownEvent {
                family,
                name: webhook.event_type.clone(),
            })?;
    let event_type = name.canonical().ok_or_else(|| UnrecognizedPayload::Unmapped {
        family,
        name: webhook.event_type.clone(),
    })?;

    let tags = webhook.data.tags.as_ref();
    let campaign_id = parse_id(tags.and_then(|t| t.get("campaign_id")));
    let subscriber_id = parse_id(tags.and_then(|t| t.get("subscriber_id")));
    let (campaign_id, subscriber_id) = campaign_id
        .zip(subscriber_id)
        .ok_or(UnrecognizedPayload::MissingCorrelation { family })?;

    Ok(
        DeliveryEvent::new(campaign_id, subscriber_id, event_type, webhook.created_at)
            .with_provider(family.to_string())
            .with_message_id(webhook.data.email_id)
            .with_raw_payload(raw.clone()),
    )
}

fn normalize_sendgrid(raw: &Value) -> Result<DeliveryEvent, UnrecognizedPayload> {
    let family = ProviderFamily::SendGrid;
    let event = SendGridEvent::deserialize(raw).map_err(|e| shape(family, e))?;

    let name: SendGridEventName =
        event
            .event
            .parse()
            .map_err(|_| UnrecognizedPayload::UnknownEvent {
                family,
                name: event.event.clone(),
            })?;
    let event_type = name.canonical().ok_or_else(|| UnrecognizedPayload::Unmapped {
        family,
        name: event.event.clone(),
    })?;

    let (campaign_id, subscriber_id) = parse_id(event.campaign_id.as_deref())
        .zip(parse_id(event.subscriber_id.as_deref()))
        .ok_or(UnrecognizedPayload::MissingCorrelation { family })?;

    let occurred_at = Utc
        .timestamp_opt(event.timestamp, 0)
        .single()
        .ok_or_else(|| UnrecognizedPayload::Shape {
            family,
            reason: format!("timestamp out of range: {}", event.timestamp),
        })?;

    // sg_message_id is the X-Message-Id returned at send time plus a suffix
    let message_id = event
        .sg_message_id
        .as_deref()
        .and_then(|id| id.split('.').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Ok(
        DeliveryEvent::new(campaign_id, subscriber_id, event_type, occurred_at)
            .with_provider(family.to_string())
            .with_message_id(message_id)
            .with_raw_payload(raw.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_resend_opened() {
        let campaign_id = Uuid::new_v4();
        let subscriber_id = Uuid::new_v4();
        let raw = json!({
            "type": "email.opened",
            "created_at": "2024-03-01T12:00:00.000Z",
            "data": {
                "email_id": "4ef9a417-02e9-4d39-ad75-9611e0fcc33c",
                "to": ["user@example.com"],
                "tags": {
                    "campaign_id": campaign_id.to_string(),
                    "subscriber_id": subscriber_id.to_string()
                }
            }
        });

        let event = EventNormalizer::new()
            .normalize(ProviderFamily::Resend, &raw)
            .unwrap();
        assert_eq!(event.event_type, DeliveryEventType::Opened);
        assert_eq!(event.campaign_id, campaign_id);
        assert_eq!(event.subscriber_id, subscriber_id);
        assert_eq!(
            event.message_id.as_deref(),
            Some("4ef9a417-02e9-4d39-ad75-9611e0fcc33c")
        );
        assert_eq!(event.provider.as_deref(), Some("resend"));
        assert_eq!(event.raw_payload, raw);
    }

    #[test]
    fn test_resend_tag_list_form() {
        let raw = json!({
            "type": "email.bounced",
            "created_at": "2024-03-01T12:00:00Z",
            "data": {
                "email_id": "m1",
                "tags": [
                    {"name": "campaign_id", "value": Uuid::new_v4().to_string()},
                    {"name": "subscriber_id", "value": Uuid::new_v4().to_string()}
                ]
            }
        });

        let event = EventNormalizer::new()
            .normalize(ProviderFamily::Resend, &raw)
            .unwrap();
        assert_eq!(event.event_type, DeliveryEventType::Bounced);
    }

    #[test]
    fn test_sendgrid_array_normalized_per_element() {
        let campaign_id = Uuid::new_v4().to_string();
        let subscriber_id = Uuid::new_v4().to_string();
        let body = json!([
            {
                "email": "user@example.com",
                "timestamp": 1709294400,
                "event": "click",
                "sg_message_id": "14c5d75ce93.dfd.64b469.filter0001.16648.5515E0B88.0",
                "campaign_id": campaign_id,
                "subscriber_id": subscriber_id
            },
            {
                "email": "user@example.com",
                "timestamp": 1709294400,
                "event": "deferred",
                "campaign_id": campaign_id,
                "subscriber_id": subscriber_id
            },
            {"event": "open"}
        ]);

        let results =
            EventNormalizer::new().normalize_body(ProviderFamily::SendGrid, body.to_string().as_bytes());
        assert_eq!(results.len(), 3);

        let click = results[0].as_ref().unwrap();
        assert_eq!(click.event_type, DeliveryEventType::Clicked);
        assert_eq!(click.message_id.as_deref(), Some("14c5d75ce93"));
        assert_eq!(click.occurred_at.timestamp(), 1709294400);

        assert!(matches!(results[1], Err(UnrecognizedPayload::Unmapped { .. })));
        assert!(matches!(results[2], Err(UnrecognizedPayload::Shape { .. })));
    }

    #[test]
    fn test_sendgrid_mapping_table() {
        let cases = [
            ("processed", Some(DeliveryEventType::Sent)),
            ("delivered", Some(DeliveryEventType::Delivered)),
            ("open", Some(DeliveryEventType::Opened)),
            ("bounce", Some(DeliveryEventType::Bounced)),
            ("dropped", Some(DeliveryEventType::Failed)),
            ("spamreport", Some(DeliveryEventType::Complained)),
            ("group_unsubscribe", Some(DeliveryEventType::Unsubscribed)),
            ("deferred", None),
        ];
        for (name, expected) in cases {
            let parsed: SendGridEventName = name.parse().unwrap();
            assert_eq!(parsed.canonical(), expected, "{}", name);
        }
    }

    #[test]
    fn test_unrecognized_payloads() {
        let normalizer = EventNormalizer::new();

        let unknown = json!({
            "type": "contact.created",
            "created_at": "2024-03-01T12:00:00Z",
            "data": {}
        });
        assert!(matches!(
            normalizer.normalize(ProviderFamily::Resend, &unknown),
            Err(UnrecognizedPayload::UnknownEvent { .. })
        ));

        let uncorrelated = json!({
            "type": "email.delivered",
            "created_at": "2024-03-01T12:00:00Z",
            "data": {"email_id": "m1"}
        });
        assert_eq!(
            normalizer.normalize(ProviderFamily::Resend, &uncorrelated),
            Err(UnrecognizedPayload::MissingCorrelation {
                family: ProviderFamily::Resend
            })
        );

        let results = normalizer.normalize_body(ProviderFamily::Resend, b"not json");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().reason(), "invalid_json");
    }

    #[test]
    fn test_provider_is_explicit() {
        // A SendGrid-shaped event on the Resend route is not guessed at
        let raw = json!({
            "event": "open",
            "timestamp": 1709294400,
            "campaign_id": Uuid::new_v4().to_string(),
            "subscriber_id": Uuid::new_v4().to_string()
        });
        assert!(matches!(
            EventNormalizer::new().normalize(ProviderFamily::Resend, &raw),
            Err(UnrecognizedPayload::Shape { .. })
        ));
    }
}
