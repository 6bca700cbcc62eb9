//! Delivery Orchestrator - Per-campaign control loop
//!
//! A campaign moves `draft -> sending -> {sent | partially_sent | failed}`.
//! Its subscribers are split into batches that are dispatched strictly one
//! after another; each batch walks the active providers in registry order
//! until one accepts it or all are exhausted.

use super::aggregator::{DeliveryStatus, DeliveryStatusAggregator, SubscriberError};
use super::batcher::make_batches;
use super::gateway::{EspSendResult, FailureKind, SendFailure};
use super::rate_limiter::RateLimiter;
use super::registry::{EspProvider, EspProviderInfo, EspRegistry};
use super::retry::RetryPolicy;
use super::status::final_campaign_status;
use crate::events::{
    EngagementSignal, EngagementTracker, EventNormalizer, InMemoryEngagementTracker,
};
use crate::metrics::DeliveryMetrics;
use chrono::Utc;
use mailcast_common::config::DeliveryConfig;
use mailcast_common::types::{CampaignId, CampaignStatus, DeliveryEventType, ProviderFamily};
use mailcast_storage::models::{Campaign, DeliveryEvent, DeliveryReport, Subscriber};
use mailcast_storage::repository::{
    CampaignRepository, DeliveryEventRepository, DeliveryReportRepository, SubscriberRepository,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error recorded for subscribers skipped by an abort
pub const ABORTED_ERROR: &str = "delivery aborted";

/// Errors returned by `deliver_campaign`
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Campaign {0} has no eligible subscribers")]
    NoEligibleSubscribers(CampaignId),

    #[error("No active ESP providers")]
    NoActiveProviders,

    #[error("Campaign {0} is already sending")]
    AlreadySending(CampaignId),

    #[error("Campaign {id} cannot be delivered from status {status}")]
    NotDeliverable { id: CampaignId, status: CampaignStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] mailcast_common::Error),
}

impl DeliveryError {
    /// Fatal pre-flight validation failures
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeliveryError::CampaignNotFound(_)
                | DeliveryError::NoEligibleSubscribers(_)
                | DeliveryError::NoActiveProviders
        )
    }
}

/// Repositories the orchestrator reads from and writes to
#[derive(Clone)]
pub struct Repositories {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub subscribers: Arc<dyn SubscriberRepository>,
    pub events: Arc<dyn DeliveryEventRepository>,
    pub reports: Arc<dyn DeliveryReportRepository>,
}

/// Tunables of the control loop
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    /// Upper bound for one gateway call
    pub send_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliverySettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            delay_between_batches: Duration::from_millis(config.delay_between_batches_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

/// Result of processing one inbound webhook body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub accepted: usize,
    pub dropped: usize,
}

/// How a batch ended
enum BatchOutcome {
    Sent {
        provider: String,
        result: EspSendResult,
    },
    Failed {
        error: String,
    },
}

/// How one provider handled a batch
enum ProviderOutcome {
    Sent(EspSendResult),
    /// Try the next provider; carries the provider error, if it produced one
    Skipped(Option<String>),
    /// No provider can accept this batch
    Fatal(String),
    Aborted,
}

type InFlight = Arc<Mutex<HashMap<CampaignId, CancellationToken>>>;

/// One `failed` event per subscriber, carrying the error in its payload
fn failed_events(campaign_id: CampaignId, batch: &[Subscriber], error: &str) -> Vec<DeliveryEvent> {
    let now = Utc::now();
    batch
        .iter()
        .map(|subscriber| {
            DeliveryEvent::new(campaign_id, subscriber.id, DeliveryEventType::Failed, now)
                .with_raw_payload(serde_json::json!({ "error": error }))
        })
        .collect()
}

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<CampaignId, CancellationToken>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a campaign from the in-flight table however delivery ends
struct InFlightGuard {
    in_flight: InFlight,
    campaign_id: CampaignId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.campaign_id);
    }
}

/// Campaign delivery orchestrator
pub struct DeliveryOrchestrator {
    repositories: Repositories,
    registry: Arc<EspRegistry>,
    rate_limiter: Arc<RateLimiter>,
    aggregator: DeliveryStatusAggregator,
    normalizer: EventNormalizer,
    engagement: Arc<dyn EngagementTracker>,
    metrics: DeliveryMetrics,
    settings: DeliverySettings,
    in_flight: InFlight,
}

impl DeliveryOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        repositories: Repositories,
        registry: Arc<EspRegistry>,
        rate_limiter: Arc<RateLimiter>,
        metrics: DeliveryMetrics,
    ) -> Self {
        Self {
            repositories,
            registry,
            rate_limiter,
            aggregator: DeliveryStatusAggregator::new(),
            normalizer: EventNormalizer::new(),
            engagement: Arc::new(InMemoryEngagementTracker::new()),
            metrics,
            settings: DeliverySettings::default(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set batch size, delays, timeout and retry policy
    pub fn with_settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the engagement tracker notified on opens and clicks
    pub fn with_engagement_tracker(mut self, tracker: Arc<dyn EngagementTracker>) -> Self {
        self.engagement = tracker;
        self
    }

    pub fn registry(&self) -> &EspRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Deliver a draft campaign to all of its eligible subscribers
    ///
    /// Returns once every batch has been attempted (or the delivery was
    /// aborted). Only pre-flight failures and storage errors are returned as
    /// errors; provider failures are accounted for in the status.
    pub async fn deliver_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<DeliveryStatus, DeliveryError> {
        let (token, _guard) = self.register(campaign_id)?;

        let campaign = self
            .repositories
            .campaigns
            .load(campaign_id)
            .await?
            .ok_or(DeliveryError::CampaignNotFound(campaign_id))?;

        match campaign.status {
            CampaignStatus::Draft => {}
            CampaignStatus::Sending => return Err(DeliveryError::AlreadySending(campaign_id)),
            status => {
                return Err(DeliveryError::NotDeliverable {
                    id: campaign_id,
                    status,
                })
            }
        }

        let subscribers: Vec<Subscriber> = self
            .repositories
            .subscribers
            .list_active_for_campaign(&campaign)
            .await?
            .into_iter()
            .filter(Subscriber::is_eligible)
            .collect();

        if subscribers.is_empty() {
            return Err(self
                .fail_preflight(&campaign, &subscribers, DeliveryError::NoEligibleSubscribers(campaign_id))
                .await);
        }

        if !self.registry.has_active() {
            return Err(self
                .fail_preflight(&campaign, &subscribers, DeliveryError::NoActiveProviders)
                .await);
        }

        // Another process may have claimed the campaign since it was loaded
        if !self.repositories.campaigns.start_sending(campaign_id).await? {
            return Err(DeliveryError::AlreadySending(campaign_id));
        }
        self.aggregator
            .start(campaign_id, subscribers.len() as u64)
            .await;

        let batches = make_batches(&subscribers, self.settings.batch_size);
        info!(
            campaign_id = %campaign_id,
            subscribers = subscribers.len(),
            batches = batches.len(),
            "Starting campaign delivery"
        );

        for (index, batch) in batches.iter().enumerate() {
            if token.is_cancelled() {
                self.record_aborted(&campaign, &batches[index..]).await;
                break;
            }

            self.process_batch(&campaign, index, batch, &token).await;

            let is_last = index + 1 == batches.len();
            if !is_last && !self.settings.delay_between_batches.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.delay_between_batches) => {}
                    _ = token.cancelled() => {
                        debug!(campaign_id = %campaign_id, "Delivery aborted between batches");
                    }
                }
            }
        }

        self.finish(&campaign).await
    }

    /// Delivery status of a campaign, live or rebuilt from its saved report
    pub async fn get_campaign_delivery_status(
        &self,
        campaign_id: CampaignId,
    ) -> mailcast_common::Result<Option<DeliveryStatus>> {
        if let Some(status) = self.aggregator.snapshot(campaign_id).await {
            return Ok(Some(status));
        }

        let Some(report) = self.repositories.reports.load_report(campaign_id).await? else {
            return Ok(None);
        };

        // Failures recorded by this engine carry no provider and an error payload
        let errors = self
            .repositories
            .events
            .list_for_campaign(campaign_id)
            .await?
            .into_iter()
            .filter(|e| e.event_type == DeliveryEventType::Failed && e.provider.is_none())
            .filter_map(|e| {
                e.raw_payload
                    .get("error")
                    .and_then(serde_json::Value::as_str)
                    .map(|error| SubscriberError {
                        subscriber_id: e.subscriber_id,
                        error: error.to_string(),
                    })
            })
            .collect();

        Ok(Some(DeliveryStatus::from_report(&report, errors)))
    }

    /// Last saved report, or a fresh one for a delivery still running
    pub async fn get_campaign_report(
        &self,
        campaign_id: CampaignId,
    ) -> mailcast_common::Result<Option<DeliveryReport>> {
        if let Some(status) = self.aggregator.snapshot(campaign_id).await {
            if !status.is_complete() {
                return Ok(Some(status.to_report(Utc::now())));
            }
        }
        self.repositories.reports.load_report(campaign_id).await
    }

    /// Stop a running delivery before its next batch
    ///
    /// Returns false when the campaign is not being delivered.
    pub fn abort_campaign(&self, campaign_id: CampaignId) -> bool {
        match lock_in_flight(&self.in_flight).get(&campaign_id) {
            Some(token) => {
                info!(campaign_id = %campaign_id, "Aborting campaign delivery");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Campaigns currently being delivered
    pub fn in_flight(&self) -> Vec<CampaignId> {
        lock_in_flight(&self.in_flight).keys().copied().collect()
    }

    /// Provider configuration with the quota left in the current windows
    pub async fn get_active_esp_configuration(&self) -> Vec<EspProviderInfo> {
        let mut providers = self.registry.configuration();
        for provider in &mut providers {
            if provider.per_second_limit.is_some() || provider.per_hour_limit.is_some() {
                provider.remaining = Some(self.rate_limiter.remaining(&provider.name).await);
            }
        }
        providers
    }

    /// Normalize and record an inbound webhook body
    ///
    /// Malformed or unrecognized payloads are logged and dropped; this never
    /// fails.
    pub async fn handle_webhook_event(&self, family: ProviderFamily, body: &[u8]) -> WebhookOutcome {
        let mut outcome = WebhookOutcome::default();
        let provider = family.to_string();

        for result in self.normalizer.normalize_body(family, body) {
            let event = match result {
                Ok(event) => event,
                Err(reason) => {
                    warn!(provider = %provider, reason = %reason, "Dropping unrecognized webhook payload");
                    self.metrics.webhook_event(&provider, reason.reason());
                    outcome.dropped += 1;
                    continue;
                }
            };

            if let Err(e) = self.repositories.events.append_event(&event).await {
                error!(
                    provider = %provider,
                    campaign_id = %event.campaign_id,
                    "Failed to record webhook event: {}", e
                );
                self.metrics.webhook_event(&provider, "storage_error");
                outcome.dropped += 1;
                continue;
            }

            if let Some(signal) = EngagementSignal::from_event(&event) {
                if let Err(e) = self.engagement.record(&signal).await {
                    warn!(
                        subscriber_id = %signal.subscriber_id,
                        "Failed to update engagement score: {}", e
                    );
                }
            }

            debug!(
                provider = %provider,
                campaign_id = %event.campaign_id,
                event_type = %event.event_type,
                "Recorded webhook event"
            );
            self.metrics.webhook_event(&provider, "accepted");
            outcome.accepted += 1;
        }

        outcome
    }

    fn register(
        &self,
        campaign_id: CampaignId,
    ) -> Result<(CancellationToken, InFlightGuard), DeliveryError> {
        let mut in_flight = lock_in_flight(&self.in_flight);
        if in_flight.contains_key(&campaign_id) {
            return Err(DeliveryError::AlreadySending(campaign_id));
        }

        let token = CancellationToken::new();
        in_flight.insert(campaign_id, token.clone());

        Ok((
            token,
            InFlightGuard {
                in_flight: self.in_flight.clone(),
                campaign_id,
            },
        ))
    }

    /// Fail a campaign before any batch is dispatched
    async fn fail_preflight(
        &self,
        campaign: &Campaign,
        subscribers: &[Subscriber],
        err: DeliveryError,
    ) -> DeliveryError {
        warn!(campaign_id = %campaign.id, "Campaign failed validation: {}", err);

        let reason = err.to_string();
        let ids: Vec<_> = subscribers.iter().map(|s| s.id).collect();
        self.aggregator
            .start(campaign.id, subscribers.len() as u64)
            .await;
        self.aggregator.record_failed(campaign.id, &ids, &reason).await;
        self.append_events(campaign.id, &failed_events(campaign.id, subscribers, &reason))
            .await;

        if let Err(e) = self
            .repositories
            .campaigns
            .update_status(campaign.id, CampaignStatus::Failed)
            .await
        {
            error!(campaign_id = %campaign.id, "Failed to mark campaign failed: {}", e);
        }
        self.save_report(campaign.id).await;

        err
    }

    /// Apply the terminal status and save the report
    async fn finish(&self, campaign: &Campaign) -> Result<DeliveryStatus, DeliveryError> {
        let status = self
            .aggregator
            .snapshot(campaign.id)
            .await
            .unwrap_or_else(|| DeliveryStatus::new(campaign.id, 0));
        let final_status = final_campaign_status(&status);

        self.repositories
            .campaigns
            .update_status(campaign.id, final_status)
            .await?;
        self.save_report(campaign.id).await;

        info!(
            campaign_id = %campaign.id,
            status = %final_status,
            sent = status.sent,
            failed = status.failed,
            "Campaign delivery finished"
        );

        Ok(status)
    }

    /// Save the campaign's report and drop its live counters
    ///
    /// The counters stay in memory when the report cannot be stored.
    async fn save_report(&self, campaign_id: CampaignId) {
        let Some(status) = self.aggregator.snapshot(campaign_id).await else {
            return;
        };

        match self
            .repositories
            .reports
            .save_report(&status.to_report(Utc::now()))
            .await
        {
            Ok(()) => self.aggregator.remove(campaign_id).await,
            Err(e) => {
                error!(campaign_id = %campaign_id, "Failed to save delivery report: {}", e);
            }
        }
    }

    async fn process_batch(
        &self,
        campaign: &Campaign,
        index: usize,
        batch: &[Subscriber],
        token: &CancellationToken,
    ) {
        match self.dispatch_batch(campaign, index, batch, token).await {
            BatchOutcome::Sent { provider, result } => {
                self.aggregator
                    .record_sent(campaign.id, batch.len() as u64)
                    .await;

                let now = Utc::now();
                let events: Vec<DeliveryEvent> = batch
                    .iter()
                    .enumerate()
                    .map(|(i, subscriber)| {
                        DeliveryEvent::new(campaign.id, subscriber.id, DeliveryEventType::Sent, now)
                            .with_provider(provider.clone())
                            .with_message_id(result.message_id_for(i).map(str::to_string))
                    })
                    .collect();
                self.append_events(campaign.id, &events).await;

                self.metrics.batch_sent(&provider, batch.len());
                debug!(
                    campaign_id = %campaign.id,
                    provider = %provider,
                    batch = index,
                    size = batch.len(),
                    "Batch sent"
                );
            }
            BatchOutcome::Failed { error } => {
                self.record_batch_failed(campaign, batch, &error).await;
                warn!(
                    campaign_id = %campaign.id,
                    batch = index,
                    size = batch.len(),
                    "All providers exhausted: {}", error
                );
            }
        }
    }

    async fn record_batch_failed(&self, campaign: &Campaign, batch: &[Subscriber], error: &str) {
        let ids: Vec<_> = batch.iter().map(|s| s.id).collect();
        self.aggregator.record_failed(campaign.id, &ids, error).await;

        self.append_events(campaign.id, &failed_events(campaign.id, batch, error))
            .await;

        self.metrics.batch_failed(batch.len());
    }

    async fn record_aborted(&self, campaign: &Campaign, remaining: &[Vec<Subscriber>]) {
        let skipped: usize = remaining.iter().map(Vec::len).sum();
        info!(
            campaign_id = %campaign.id,
            skipped,
            "Delivery aborted, remaining subscribers not sent"
        );

        for batch in remaining {
            self.record_batch_failed(campaign, batch, ABORTED_ERROR).await;
        }
    }

    async fn append_events(&self, campaign_id: CampaignId, events: &[DeliveryEvent]) {
        if let Err(e) = self.repositories.events.append_events(events).await {
            error!(campaign_id = %campaign_id, "Failed to append delivery events: {}", e);
        }
    }

    /// Walk the active providers until one accepts the batch
    async fn dispatch_batch(
        &self,
        campaign: &Campaign,
        index: usize,
        batch: &[Subscriber],
        token: &CancellationToken,
    ) -> BatchOutcome {
        let mut last_error = None;

        for provider in self.registry.active() {
            match self.try_provider(campaign, index, provider, batch, token).await {
                ProviderOutcome::Sent(result) => {
                    return BatchOutcome::Sent {
                        provider: provider.name.clone(),
                        result,
                    }
                }
                ProviderOutcome::Skipped(error) => {
                    if error.is_some() {
                        last_error = error;
                    }
                }
                ProviderOutcome::Fatal(error) => return BatchOutcome::Failed { error },
                ProviderOutcome::Aborted => {
                    return BatchOutcome::Failed {
                        error: ABORTED_ERROR.to_string(),
                    }
                }
            }
        }

        BatchOutcome::Failed {
            error: last_error
                .unwrap_or_else(|| "rate limit quota exhausted on every provider".to_string()),
        }
    }

    /// Send a batch through one provider, retrying transient failures
    async fn try_provider(
        &self,
        campaign: &Campaign,
        index: usize,
        provider: &EspProvider,
        batch: &[Subscriber],
        token: &CancellationToken,
    ) -> ProviderOutcome {
        let mut attempt = 1;

        loop {
            if !self.rate_limiter.reserve(&provider.name, batch.len()).await {
                debug!(
                    campaign_id = %campaign.id,
                    provider = %provider.name,
                    batch = index,
                    "Provider quota exhausted, trying next provider"
                );
                return ProviderOutcome::Skipped(None);
            }

            let send = tokio::time::timeout(
                self.settings.send_timeout,
                provider.gateway.send(campaign, batch, &provider.credentials),
            );
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return ProviderOutcome::Aborted,
                result = send => result.unwrap_or_else(|_| {
                    EspSendResult::Failed(SendFailure::timed_out(self.settings.send_timeout))
                }),
            };

            let failure = match result {
                EspSendResult::Sent { .. } => return ProviderOutcome::Sent(result),
                EspSendResult::Failed(failure) => failure,
            };

            self.metrics
                .provider_failure(&provider.name, failure.kind.as_str());
            let message = format!("{}: {}", provider.name, failure.message);

            if failure.kind == FailureKind::RateLimited {
                warn!(
                    campaign_id = %campaign.id,
                    provider = %provider.name,
                    batch = index,
                    "Provider rate limited the batch, trying next provider"
                );
                return ProviderOutcome::Skipped(Some(message));
            }

            if failure.kind.stops_failover() {
                error!(
                    campaign_id = %campaign.id,
                    provider = %provider.name,
                    batch = index,
                    "Malformed request, not trying other providers: {}", failure.message
                );
                return ProviderOutcome::Fatal(message);
            }

            if !self.settings.retry.should_retry(attempt, &failure) {
                warn!(
                    campaign_id = %campaign.id,
                    provider = %provider.name,
                    batch = index,
                    kind = %failure.kind,
                    "Provider failed the batch: {}", failure.message
                );
                return ProviderOutcome::Skipped(Some(message));
            }

            let backoff = self.settings.retry.backoff_for(attempt);
            warn!(
                campaign_id = %campaign.id,
                provider = %provider.name,
                batch = index,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Transient provider failure, retrying: {}", failure.message
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = token.cancelled() => return ProviderOutcome::Aborted,
            }
            attempt += 1;
        }
    }
}
