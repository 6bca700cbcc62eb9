//! Database models

use chrono::{DateTime, Utc};
use mailcast_common::types::{
    CampaignId, CampaignStatus, DeliveryEventId, DeliveryEventType, ListId, SubscriberId,
    SubscriberStatus,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub reply_to: Option<String>,
    /// Subscriber lists targeted by this campaign
    pub list_ids: Vec<ListId>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a draft campaign
    pub fn draft(
        name: impl Into<String>,
        subject: impl Into<String>,
        from_email: impl Into<String>,
        list_ids: Vec<ListId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: subject.into(),
            html_body: None,
            text_body: None,
            from_name: None,
            from_email: from_email.into(),
            reply_to: None,
            list_ids,
            status: CampaignStatus::Draft,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Sender formatted as a mailbox (`Name <address>`)
    pub fn sender(&self) -> String {
        match &self.from_name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.from_email),
            _ => self.from_email.clone(),
        }
    }
}

/// Subscriber model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub list_id: ListId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Free-form personalization fields
    pub custom_fields: serde_json::Value,
    pub status: SubscriberStatus,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    /// Create an active subscriber
    pub fn active(list_id: ListId, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            list_id,
            email: email.into(),
            first_name: None,
            last_name: None,
            custom_fields: serde_json::json!({}),
            status: SubscriberStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Whether this subscriber may receive a send
    pub fn is_eligible(&self) -> bool {
        self.status == SubscriberStatus::Active
    }

    /// Display name built from first and last name
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// Canonical delivery event
///
/// Events are append-only: once written they are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: DeliveryEventId,
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub event_type: DeliveryEventType,
    /// Provider that produced or carried the event
    pub provider: Option<String>,
    /// Provider message id, when known
    pub message_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Provider payload retained for audit
    pub raw_payload: serde_json::Value,
}

impl DeliveryEvent {
    /// Create a new event with a fresh id
    pub fn new(
        campaign_id: CampaignId,
        subscriber_id: SubscriberId,
        event_type: DeliveryEventType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            campaign_id,
            subscriber_id,
            event_type,
            provider: None,
            message_id: None,
            occurred_at,
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_raw_payload(mut self, raw: serde_json::Value) -> Self {
        self.raw_payload = raw;
        self
    }
}

/// One bucket of the error histogram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBucket {
    pub message: String,
    pub count: u64,
}

/// Per-campaign delivery report snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub campaign_id: CampaignId,
    pub total_subscribers: u64,
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
    pub success_rate: f64,
    /// Errors grouped by normalized message, most frequent first
    pub error_histogram: Vec<ErrorBucket>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_sender() {
        let mut campaign = Campaign::draft("Launch", "Hello", "news@example.com", vec![]);
        assert_eq!(campaign.sender(), "news@example.com");

        campaign.from_name = Some("Example News".to_string());
        assert_eq!(campaign.sender(), "Example News <news@example.com>");
    }

    #[test]
    fn test_subscriber_eligibility() {
        let mut subscriber = Subscriber::active(Uuid::new_v4(), "a@example.com");
        assert!(subscriber.is_eligible());

        subscriber.status = SubscriberStatus::Bounced;
        assert!(!subscriber.is_eligible());
    }

    #[test]
    fn test_subscriber_full_name() {
        let mut subscriber = Subscriber::active(Uuid::new_v4(), "a@example.com");
        assert_eq!(subscriber.full_name(), None);

        subscriber.first_name = Some("Ada".to_string());
        assert_eq!(subscriber.full_name().as_deref(), Some("Ada"));

        subscriber.last_name = Some("Lovelace".to_string());
        assert_eq!(subscriber.full_name().as_deref(), Some("Ada Lovelace"));
    }
}
