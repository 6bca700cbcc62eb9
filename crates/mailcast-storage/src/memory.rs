//! In-memory repositories
//!
//! Used by tests and by the `memory` database backend. State lives behind
//! `tokio::sync::RwLock`, so the repositories are cheap to clone and safe to
//! share between concurrently running campaigns.

use async_trait::async_trait;
use chrono::Utc;
use mailcast_common::types::{CampaignId, CampaignStatus};
use mailcast_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{Campaign, DeliveryEvent, DeliveryReport, Subscriber};
use crate::repository::{
    CampaignRepository, DeliveryEventRepository, DeliveryReportRepository, SubscriberRepository,
};

/// In-memory campaign store
#[derive(Clone, Default)]
pub struct InMemoryCampaignRepository {
    campaigns: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn load(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn save(&self, campaign: &Campaign) -> Result<()> {
        self.campaigns
            .write()
            .await
            .insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn update_status(&self, id: CampaignId, status: CampaignStatus) -> Result<()> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("campaign {}", id)))?;

        let now = Utc::now();
        campaign.status = status;
        campaign.updated_at = now;
        if status == CampaignStatus::Sending {
            campaign.started_at = Some(now);
        }
        if status.is_terminal() {
            campaign.completed_at = Some(now);
        }
        Ok(())
    }

    async fn start_sending(&self, id: CampaignId) -> Result<bool> {
        let mut campaigns = self.campaigns.write().await;
        let Some(campaign) = campaigns.get_mut(&id) else {
            return Ok(false);
        };
        if campaign.status != CampaignStatus::Draft {
            return Ok(false);
        }

        let now = Utc::now();
        campaign.status = CampaignStatus::Sending;
        campaign.updated_at = now;
        campaign.started_at = Some(now);
        Ok(true)
    }
}

/// In-memory subscriber store, kept in insertion order
#[derive(Clone, Default)]
pub struct InMemorySubscriberRepository {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl InMemorySubscriberRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to its list
    pub async fn insert(&self, subscriber: Subscriber) {
        self.subscribers.write().await.push(subscriber);
    }

    /// Add several subscribers, preserving order
    pub async fn insert_all(&self, subscribers: impl IntoIterator<Item = Subscriber>) {
        self.subscribers.write().await.extend(subscribers);
    }
}

#[async_trait]
impl SubscriberRepository for InMemorySubscriberRepository {
    async fn list_active_for_campaign(&self, campaign: &Campaign) -> Result<Vec<Subscriber>> {
        let subscribers = self.subscribers.read().await;
        let mut seen = HashSet::new();

        Ok(subscribers
            .iter()
            .filter(|s| campaign.list_ids.contains(&s.list_id) && s.is_eligible())
            .filter(|s| seen.insert(s.email.to_ascii_lowercase()))
            .cloned()
            .collect())
    }
}

/// In-memory append-only event log
#[derive(Clone, Default)]
pub struct InMemoryDeliveryEventRepository {
    events: Arc<RwLock<Vec<DeliveryEvent>>>,
}

impl InMemoryDeliveryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, oldest first
    pub async fn all(&self) -> Vec<DeliveryEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl DeliveryEventRepository for InMemoryDeliveryEventRepository {
    async fn append_event(&self, event: &DeliveryEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn append_events(&self, events: &[DeliveryEvent]) -> Result<()> {
        self.events.write().await.extend_from_slice(events);
        Ok(())
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

/// In-memory report snapshots
#[derive(Clone, Default)]
pub struct InMemoryDeliveryReportRepository {
    reports: Arc<RwLock<HashMap<CampaignId, DeliveryReport>>>,
}

impl InMemoryDeliveryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryReportRepository for InMemoryDeliveryReportRepository {
    async fn save_report(&self, report: &DeliveryReport) -> Result<()> {
        self.reports
            .write()
            .await
            .insert(report.campaign_id, report.clone());
        Ok(())
    }

    async fn load_report(&self, campaign_id: CampaignId) -> Result<Option<DeliveryReport>> {
        Ok(self.reports.read().await.get(&campaign_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailcast_common::types::{DeliveryEventType, SubscriberStatus};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_campaign_status_timestamps() {
        let repo = InMemoryCampaignRepository::new();
        let campaign = Campaign::draft("c", "s", "from@example.com", vec![]);
        repo.save(&campaign).await.unwrap();

        repo.update_status(campaign.id, CampaignStatus::Sending)
            .await
            .unwrap();
        let loaded = repo.load(campaign.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CampaignStatus::Sending);
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_none());

        repo.update_status(campaign.id, CampaignStatus::Sent)
            .await
            .unwrap();
        let loaded = repo.load(campaign.id).await.unwrap().unwrap();
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_start_sending_only_from_draft() {
        let repo = InMemoryCampaignRepository::new();
        let campaign = Campaign::draft("c", "s", "from@example.com", vec![]);
        repo.save(&campaign).await.unwrap();

        assert!(repo.start_sending(campaign.id).await.unwrap());
        assert!(!repo.start_sending(campaign.id).await.unwrap());
        assert!(!repo.start_sending(Uuid::new_v4()).await.unwrap());

        let loaded = repo.load(campaign.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CampaignStatus::Sending);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_status_unknown_campaign() {
        let repo = InMemoryCampaignRepository::new();
        let err = repo
            .update_status(Uuid::new_v4(), CampaignStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_active_subscribers_filtered_and_deduplicated() {
        let list_a = Uuid::new_v4();
        let list_b = Uuid::new_v4();
        let other = Uuid::new_v4();

        let repo = InMemorySubscriberRepository::new();
        let mut bounced = Subscriber::active(list_a, "bounced@example.com");
        bounced.status = SubscriberStatus::Bounced;

        repo.insert_all(vec![
            Subscriber::active(list_a, "one@example.com"),
            bounced,
            Subscriber::active(list_b, "ONE@example.com"),
            Subscriber::active(list_b, "two@example.com"),
            Subscriber::active(other, "three@example.com"),
        ])
        .await;

        let campaign = Campaign::draft("c", "s", "from@example.com", vec![list_a, list_b]);
        let emails: Vec<String> = repo
            .list_active_for_campaign(&campaign)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.email)
            .collect();

        assert_eq!(emails, vec!["one@example.com", "two@example.com"]);
    }

    #[tokio::test]
    async fn test_events_filtered_by_campaign() {
        let repo = InMemoryDeliveryEventRepository::new();
        let campaign_id = Uuid::new_v4();

        repo.append_events(&[
            DeliveryEvent::new(campaign_id, Uuid::new_v4(), DeliveryEventType::Sent, Utc::now()),
            DeliveryEvent::new(Uuid::new_v4(), Uuid::new_v4(), DeliveryEventType::Sent, Utc::now()),
        ])
        .await
        .unwrap();

        assert_eq!(repo.list_for_campaign(campaign_id).await.unwrap().len(), 1);
        assert_eq!(repo.all().await.len(), 2);
    }
}
