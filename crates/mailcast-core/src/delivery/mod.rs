//! Campaign delivery - batching, rate limiting, provider failover and accounting

mod aggregator;
mod batcher;
pub mod gateway;
mod orchestrator;
mod rate_limiter;
mod registry;
mod retry;
mod status;

pub use aggregator::{DeliveryStatus, DeliveryStatusAggregator, SubscriberError};
pub use batcher::make_batches;
pub use gateway::{Credentials, EspGateway, EspSendResult, FailureKind, SendFailure};
pub use orchestrator::{
    DeliveryError, DeliveryOrchestrator, DeliverySettings, Repositories, WebhookOutcome,
    ABORTED_ERROR,
};
pub use rate_limiter::{ProviderQuota, RateLimiter, RemainingQuota};
pub use registry::{EspProvider, EspProviderInfo, EspRegistry};
pub use retry::RetryPolicy;
pub use status::final_campaign_status;
