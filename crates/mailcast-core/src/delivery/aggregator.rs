//! Delivery Status Aggregator - Live per-campaign counters
//!
//! Every update is applied under a single write lock, so readers always see
//! `sent + failed + pending == total_subscribers`.

use chrono::{DateTime, Utc};
use mailcast_common::types::{CampaignId, SubscriberId};
use mailcast_storage::models::{DeliveryReport, ErrorBucket};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Why one subscriber was not sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberError {
    pub subscriber_id: SubscriberId,
    pub error: String,
}

/// Delivery progress of one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub campaign_id: CampaignId,
    pub total_subscribers: u64,
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
    pub errors: Vec<SubscriberError>,
}

impl DeliveryStatus {
    pub fn new(campaign_id: CampaignId, total_subscribers: u64) -> Self {
        Self {
            campaign_id,
            total_subscribers,
            sent: 0,
            failed: 0,
            pending: total_subscribers,
            errors: Vec::new(),
        }
    }

    /// Status rebuilt from a stored report and the failures logged for it
    pub fn from_report(report: &DeliveryReport, errors: Vec<SubscriberError>) -> Self {
        Self {
            campaign_id: report.campaign_id,
            total_subscribers: report.total_subscribers,
            sent: report.sent,
            failed: report.failed,
            pending: report.pending,
            errors,
        }
    }

    /// Move up to `count` pending subscribers to sent; returns how many moved
    pub fn record_sent(&mut self, count: u64) -> u64 {
        let moved = count.min(self.pending);
        self.sent += moved;
        self.pending -= moved;
        moved
    }

    /// Move the given pending subscribers to failed with one error message
    pub fn record_failed(&mut self, subscribers: &[SubscriberId], error: &str) -> u64 {
        let moved = (subscribers.len() as u64).min(self.pending);
        self.failed += moved;
        self.pending -= moved;
        self.errors.extend(
            subscribers
                .iter()
                .take(moved as usize)
                .map(|id| SubscriberError {
                    subscriber_id: *id,
                    error: error.to_string(),
                }),
        );
        moved
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    /// Percentage of subscribers sent to, 0 when there are none
    pub fn success_rate(&self) -> f64 {
        if self.total_subscribers == 0 {
            0.0
        } else {
            self.sent as f64 / self.total_subscribers as f64 * 100.0
        }
    }

    /// Errors grouped by normalized message, most frequent first
    pub fn error_histogram(&self) -> Vec<ErrorBucket> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in &self.errors {
            *counts.entry(normalize_error(&entry.error)).or_default() += 1;
        }

        let mut buckets: Vec<ErrorBucket> = counts
            .into_iter()
            .map(|(message, count)| ErrorBucket { message, count })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        buckets
    }

    /// Report snapshot of the current counters
    pub fn to_report(&self, generated_at: DateTime<Utc>) -> DeliveryReport {
        DeliveryReport {
            campaign_id: self.campaign_id,
            total_subscribers: self.total_subscribers,
            sent: self.sent,
            failed: self.failed,
            pending: self.pending,
            success_rate: self.success_rate(),
            error_histogram: self.error_histogram(),
            generated_at,
        }
    }
}

/// Normalize an error message for grouping
fn normalize_error(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Shared live status of every campaign delivered by this process
#[derive(Clone, Default)]
pub struct DeliveryStatusAggregator {
    statuses: Arc<RwLock<HashMap<CampaignId, DeliveryStatus>>>,
}

impl DeliveryStatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset a campaign's counters with every subscriber pending
    pub async fn start(&self, campaign_id: CampaignId, total_subscribers: u64) {
        self.statuses
            .write()
            .await
            .insert(campaign_id, DeliveryStatus::new(campaign_id, total_subscribers));
    }

    pub async fn record_sent(&self, campaign_id: CampaignId, count: u64) {
        if let Some(status) = self.statuses.write().await.get_mut(&campaign_id) {
            status.record_sent(count);
        }
    }

    pub async fn record_failed(
        &self,
        campaign_id: CampaignId,
        subscribers: &[SubscriberId],
        error: &str,
    ) {
        if let Some(status) = self.statuses.write().await.get_mut(&campaign_id) {
            status.record_failed(subscribers, error);
        }
    }

    /// Consistent copy of a campaign's counters
    pub async fn snapshot(&self, campaign_id: CampaignId) -> Option<DeliveryStatus> {
        self.statuses.read().await.get(&campaign_id).cloned()
    }

    /// Forget a campaign's counters
    pub async fn remove(&self, campaign_id: CampaignId) {
        self.statuses.write().await.remove(&campaign_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_counters_stay_consistent() {
        let mut status = DeliveryStatus::new(Uuid::new_v4(), 5);
        status.record_sent(2);
        status.record_failed(&[Uuid::new_v4()], "boom");

        assert_eq!((status.sent, status.failed, status.pending), (2, 1, 2));
        assert_eq!(status.sent + status.failed + status.pending, status.total_subscribers);
        assert!(!status.is_complete());

        // Never overshoot the pending count
        assert_eq!(status.record_sent(10), 2);
        assert!(status.is_complete());
        assert_eq!(status.sent + status.failed, 5);
    }

    #[test]
    fn test_success_rate() {
        let mut status = DeliveryStatus::new(Uuid::new_v4(), 120);
        status.record_sent(100);
        let ids: Vec<SubscriberId> = (0..20).map(|_| Uuid::new_v4()).collect();
        status.record_failed(&ids, "esp down");

        let rate = status.success_rate();
        assert!((rate - 83.333).abs() < 0.01);
        assert_eq!(DeliveryStatus::new(Uuid::new_v4(), 0).success_rate(), 0.0);
    }

    #[test]
    fn test_error_histogram_groups_normalized_messages() {
        let mut status = DeliveryStatus::new(Uuid::new_v4(), 4);
        status.record_failed(&[Uuid::new_v4(), Uuid::new_v4()], "HTTP 503:  Service  Unavailable");
        status.record_failed(&[Uuid::new_v4()], "http 503: service unavailable");
        status.record_failed(&[Uuid::new_v4()], "invalid sender");

        assert_eq!(
            status.error_histogram(),
            vec![
                ErrorBucket {
                    message: "http 503: service unavailable".to_string(),
                    count: 3
                },
                ErrorBucket {
                    message: "invalid sender".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_aggregator_snapshots() {
        let aggregator = DeliveryStatusAggregator::new();
        let campaign_id = Uuid::new_v4();
        assert!(aggregator.snapshot(campaign_id).await.is_none());

        aggregator.start(campaign_id, 3).await;
        aggregator.record_sent(campaign_id, 2).await;
        aggregator
            .record_failed(campaign_id, &[Uuid::new_v4()], "rejected")
            .await;

        let snapshot = aggregator.snapshot(campaign_id).await.unwrap();
        assert_eq!((snapshot.sent, snapshot.failed, snapshot.pending), (2, 1, 0));

        let report = snapshot.to_report(Utc::now());
        assert_eq!(report.error_histogram.len(), 1);
        assert!((report.success_rate - 66.666).abs() < 0.01);

        aggregator.remove(campaign_id).await;
        assert!(aggregator.snapshot(campaign_id).await.is_none());
    }

    #[test]
    fn test_status_from_report() {
        let mut live = DeliveryStatus::new(Uuid::new_v4(), 3);
        live.record_sent(1);
        live.record_failed(&[Uuid::new_v4(), Uuid::new_v4()], "bounced");

        let rebuilt = DeliveryStatus::from_report(&live.to_report(Utc::now()), live.errors.clone());
        assert_eq!(rebuilt, live);
    }
}
