//! Mailcast Core - Campaign delivery engine
//!
//! This crate delivers email campaigns through one or more ESPs with
//! per-provider rate limits and failover, keeps an accurate per-campaign
//! accounting, and normalizes inbound provider webhooks.

pub mod delivery;
pub mod events;
pub mod metrics;

pub use delivery::{
    DeliveryError, DeliveryOrchestrator, DeliverySettings, DeliveryStatus, EspProvider,
    EspRegistry, RateLimiter, Repositories, RetryPolicy,
};
pub use events::{EngagementTracker, EventNormalizer, InMemoryEngagementTracker};
pub use metrics::DeliveryMetrics;
