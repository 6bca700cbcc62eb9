//! Common types for Mailcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for subscribers
pub type SubscriberId = Uuid;

/// Unique identifier for subscriber lists
pub type ListId = Uuid;

/// Unique identifier for delivery events
pub type DeliveryEventId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (local, domain) = s.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') || s.contains(' ') {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Sent,
    PartiallySent,
    Failed,
}

impl CampaignStatus {
    /// Whether delivery has finished (successfully or not)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Sent | CampaignStatus::PartiallySent | CampaignStatus::Failed
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Sending => write!(f, "sending"),
            CampaignStatus::Sent => write!(f, "sent"),
            CampaignStatus::PartiallySent => write!(f, "partially_sent"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "sending" => Ok(CampaignStatus::Sending),
            "sent" => Ok(CampaignStatus::Sent),
            "partially_sent" => Ok(CampaignStatus::PartiallySent),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Subscriber membership status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Active,
    Unsubscribed,
    Bounced,
}

impl std::fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriberStatus::Active => write!(f, "active"),
            SubscriberStatus::Unsubscribed => write!(f, "unsubscribed"),
            SubscriberStatus::Bounced => write!(f, "bounced"),
        }
    }
}

impl std::str::FromStr for SubscriberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriberStatus::Active),
            "unsubscribed" => Ok(SubscriberStatus::Unsubscribed),
            "bounced" => Ok(SubscriberStatus::Bounced),
            _ => Err(format!("Invalid subscriber status: {}", s)),
        }
    }
}

/// Canonical delivery event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEventType {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
    Failed,
}

impl DeliveryEventType {
    /// Engagement events feed the subscriber engagement score
    pub fn is_engagement(&self) -> bool {
        matches!(self, DeliveryEventType::Opened | DeliveryEventType::Clicked)
    }
}

impl std::fmt::Display for DeliveryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryEventType::Sent => "sent",
            DeliveryEventType::Delivered => "delivered",
            DeliveryEventType::Opened => "opened",
            DeliveryEventType::Clicked => "clicked",
            DeliveryEventType::Bounced => "bounced",
            DeliveryEventType::Complained => "complained",
            DeliveryEventType::Unsubscribed => "unsubscribed",
            DeliveryEventType::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeliveryEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryEventType::Sent),
            "delivered" => Ok(DeliveryEventType::Delivered),
            "opened" => Ok(DeliveryEventType::Opened),
            "clicked" => Ok(DeliveryEventType::Clicked),
            "bounced" => Ok(DeliveryEventType::Bounced),
            "complained" => Ok(DeliveryEventType::Complained),
            "unsubscribed" => Ok(DeliveryEventType::Unsubscribed),
            "failed" => Ok(DeliveryEventType::Failed),
            _ => Err(format!("Invalid delivery event type: {}", s)),
        }
    }
}

/// ESP API family a provider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// Batch endpoint taking one message object per recipient
    Resend,
    /// Single endpoint taking one personalization block per recipient
    #[serde(rename = "sendgrid")]
    SendGrid,
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderFamily::Resend => write!(f, "resend"),
            ProviderFamily::SendGrid => write!(f, "sendgrid"),
        }
    }
}

impl std::str::FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resend" => Ok(ProviderFamily::Resend),
            "sendgrid" => Ok(ProviderFamily::SendGrid),
            _ => Err(format!("Unknown provider family: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("user@example.com").unwrap();
        assert_eq!(email.local, "user");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "user@example.com");
    }

    #[test]
    fn test_email_address_invalid() {
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
        assert!(EmailAddress::parse("a@b@c").is_none());
    }

    #[test]
    fn test_campaign_status_roundtrip() {
        assert_eq!(CampaignStatus::PartiallySent.to_string(), "partially_sent");
        assert_eq!(
            "partially_sent".parse::<CampaignStatus>().unwrap(),
            CampaignStatus::PartiallySent
        );
        assert!("completed".parse::<CampaignStatus>().is_err());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Sending.is_terminal());
    }

    #[test]
    fn test_provider_family_parse() {
        assert_eq!("SendGrid".parse::<ProviderFamily>().unwrap(), ProviderFamily::SendGrid);
        assert_eq!("resend".parse::<ProviderFamily>().unwrap(), ProviderFamily::Resend);
        assert!("mailgun".parse::<ProviderFamily>().is_err());
    }

    #[test]
    fn test_engagement_events() {
        assert!(DeliveryEventType::Opened.is_engagement());
        assert!(DeliveryEventType::Clicked.is_engagement());
        assert!(!DeliveryEventType::Delivered.is_engagement());
    }
}
