//! Engagement tracking
//!
//! Opens and clicks feed a per-subscriber engagement score. Providers may
//! deliver the same webhook more than once, so a tracker must count each
//! (subscriber, message id, event type) key at most once. A provider message
//! id can cover a whole batch, so the subscriber is part of the key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{CampaignId, DeliveryEventType, SubscriberId};
use mailcast_common::Result;
use mailcast_storage::models::DeliveryEvent;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One open or click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementSignal {
    pub campaign_id: CampaignId,
    pub subscriber_id: SubscriberId,
    pub event_type: DeliveryEventType,
    pub message_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EngagementSignal {
    /// Signal for an engagement event, `None` for any other event type
    pub fn from_event(event: &DeliveryEvent) -> Option<Self> {
        event.event_type.is_engagement().then(|| Self {
            campaign_id: event.campaign_id,
            subscriber_id: event.subscriber_id,
            event_type: event.event_type,
            message_id: event.message_id.clone(),
            occurred_at: event.occurred_at,
        })
    }
}

/// Collaborator that turns engagement signals into scores
#[async_trait]
pub trait EngagementTracker: Send + Sync {
    /// Record one signal; returns false when it was a duplicate
    async fn record(&self, signal: &EngagementSignal) -> Result<bool>;
}

/// Engagement counters for one subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngagementScore {
    pub opens: u64,
    pub clicks: u64,
    pub last_engaged_at: Option<DateTime<Utc>>,
}

impl EngagementScore {
    /// Clicks weigh more than opens
    pub fn score(&self) -> u64 {
        self.opens + self.clicks * 3
    }
}

/// Dedup keys remembered by default
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

type DedupKey = (SubscriberId, String, DeliveryEventType);

/// Most recent dedup keys, oldest evicted first
struct SeenKeys {
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
    capacity: usize,
}

impl SeenKeys {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false when the key is already remembered
    fn insert(&mut self, key: DedupKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct TrackerState {
    scores: HashMap<SubscriberId, EngagementScore>,
    seen: SeenKeys,
}

/// In-process engagement tracker
///
/// Only the most recent dedup keys are kept, so a duplicate arriving after
/// `capacity` newer signals is counted again.
#[derive(Clone)]
pub struct InMemoryEngagementTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl Default for InMemoryEngagementTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_DEDUP_CAPACITY)
    }
}

impl InMemoryEngagementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker remembering at most `capacity` dedup keys
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(TrackerState {
                scores: HashMap::new(),
                seen: SeenKeys::new(capacity),
            })),
        }
    }

    /// Number of dedup keys currently remembered
    pub async fn remembered(&self) -> usize {
        self.state.read().await.seen.len()
    }

    pub async fn score(&self, subscriber_id: SubscriberId) -> Option<EngagementScore> {
        self.state.read().await.scores.get(&subscriber_id).cloned()
    }
}

#[async_trait]
impl EngagementTracker for InMemoryEngagementTracker {
    async fn record(&self, signal: &EngagementSignal) -> Result<bool> {
        if !signal.event_type.is_engagement() {
            return Ok(false);
        }

        let mut state = self.state.write().await;

        if let Some(message_id) = &signal.message_id {
            let key = (signal.subscriber_id, message_id.clone(), signal.event_type);
            if !state.seen.insert(key) {
                return Ok(false);
            }
        }

        let score = state.scores.entry(signal.subscriber_id).or_default();
        match signal.event_type {
            DeliveryEventType::Opened => score.opens += 1,
            DeliveryEventType::Clicked => score.clicks += 1,
            _ => return Ok(false),
        }
        score.last_engaged_at = Some(
            score
                .last_engaged_at
                .map_or(signal.occurred_at, |at| at.max(signal.occurred_at)),
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn signal(subscriber_id: SubscriberId, event_type: DeliveryEventType, id: &str) -> EngagementSignal {
        EngagementSignal {
            campaign_id: Uuid::new_v4(),
            subscriber_id,
            event_type,
            message_id: Some(id.to_string()),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicates_counted_once() {
        let tracker = InMemoryEngagementTracker::new();
        let subscriber = Uuid::new_v4();

        assert!(tracker
            .record(&signal(subscriber, DeliveryEventType::Opened, "m1"))
            .await
            .unwrap());
        assert!(!tracker
            .record(&signal(subscriber, DeliveryEventType::Opened, "m1"))
            .await
            .unwrap());
        assert!(tracker
            .record(&signal(subscriber, DeliveryEventType::Clicked, "m1"))
            .await
            .unwrap());

        let score = tracker.score(subscriber).await.unwrap();
        assert_eq!((score.opens, score.clicks), (1, 1));
        assert_eq!(score.score(), 4);
        assert!(score.last_engaged_at.is_some());
    }

    #[tokio::test]
    async fn test_shared_message_id_counts_per_subscriber() {
        let tracker = InMemoryEngagementTracker::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(tracker
            .record(&signal(alice, DeliveryEventType::Opened, "abc"))
            .await
            .unwrap());
        assert!(tracker
            .record(&signal(bob, DeliveryEventType::Opened, "abc"))
            .await
            .unwrap());

        assert_eq!(tracker.score(alice).await.unwrap().opens, 1);
        assert_eq!(tracker.score(bob).await.unwrap().opens, 1);
    }

    #[tokio::test]
    async fn test_dedup_keys_bounded() {
        let tracker = InMemoryEngagementTracker::with_capacity(2);
        let subscriber = Uuid::new_v4();

        for id in ["m1", "m2", "m3"] {
            assert!(tracker
                .record(&signal(subscriber, DeliveryEventType::Opened, id))
                .await
                .unwrap());
        }
        assert_eq!(tracker.remembered().await, 2);

        // m1 was evicted, m3 is still remembered
        assert!(tracker
            .record(&signal(subscriber, DeliveryEventType::Opened, "m1"))
            .await
            .unwrap());
        assert!(!tracker
            .record(&signal(subscriber, DeliveryEventType::Opened, "m3"))
            .await
            .unwrap());
        assert_eq!(tracker.score(subscriber).await.unwrap().opens, 4);
        assert_eq!(tracker.remembered().await, 2);
    }

    #[test]
    fn test_signal_only_for_engagement_events() {
        let delivered = DeliveryEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            DeliveryEventType::Delivered,
            Utc::now(),
        );
        assert!(EngagementSignal::from_event(&delivered).is_none());

        let opened = DeliveryEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            DeliveryEventType::Opened,
            Utc::now(),
        );
        assert!(EngagementSignal::from_event(&opened).is_some());
    }
}
