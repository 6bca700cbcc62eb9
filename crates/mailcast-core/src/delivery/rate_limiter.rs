//! Rate Limiter - Per-provider send quotas
//!
//! Each provider may carry a per-second and a per-hour quota. Windows are
//! aligned to the start of the current second and hour. A reservation either
//! takes the whole requested count from every window or takes nothing.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Send quota for one provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderQuota {
    /// Messages per second (unlimited when unset)
    pub per_second: Option<u32>,
    /// Messages per hour (unlimited when unset)
    pub per_hour: Option<u32>,
}

impl ProviderQuota {
    pub fn new(per_second: Option<u32>, per_hour: Option<u32>) -> Self {
        Self {
            per_second,
            per_hour,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.per_second.is_none() && self.per_hour.is_none()
    }
}

/// Counters for the windows currently open for one provider
#[derive(Debug, Clone, Copy)]
struct WindowCounters {
    second_start: DateTime<Utc>,
    second_count: u64,
    hour_start: DateTime<Utc>,
    hour_count: u64,
}

impl WindowCounters {
    fn opened_at(now: DateTime<Utc>) -> Self {
        Self {
            second_start: second_window(now),
            second_count: 0,
            hour_start: hour_window(now),
            hour_count: 0,
        }
    }

    /// Reset any window that has rolled over since the last reservation
    fn roll(&mut self, now: DateTime<Utc>) {
        let second = second_window(now);
        if second != self.second_start {
            self.second_start = second;
            self.second_count = 0;
        }

        let hour = hour_window(now);
        if hour != self.hour_start {
            self.hour_start = hour;
            self.hour_count = 0;
        }
    }
}

fn second_window(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap_or(now)
}

fn hour_window(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(now)
}

/// Rate limiter shared by every campaign using the same providers
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, ProviderQuota>,
    counters: Mutex<HashMap<String, WindowCounters>>,
}

impl RateLimiter {
    /// Create a limiter with no quotas configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the quota for a provider
    pub fn with_limit(mut self, provider: impl Into<String>, quota: ProviderQuota) -> Self {
        self.limits.insert(provider.into(), quota);
        self
    }

    /// Configured quota for a provider, if any
    pub fn limit_for(&self, provider: &str) -> Option<ProviderQuota> {
        self.limits.get(provider).copied()
    }

    /// Try to reserve `count` sends for `provider` right now
    pub async fn reserve(&self, provider: &str, count: usize) -> bool {
        self.reserve_at(provider, count, Utc::now()).await
    }

    /// Try to reserve `count` sends for `provider` at the given instant
    ///
    /// Providers without a configured quota are unlimited. When either window
    /// cannot absorb the whole count, nothing is recorded.
    pub async fn reserve_at(&self, provider: &str, count: usize, now: DateTime<Utc>) -> bool {
        let quota = match self.limits.get(provider) {
            Some(quota) if !quota.is_unlimited() => *quota,
            _ => return true,
        };

        let count = count as u64;
        let mut counters = self.counters.lock().await;
        let window = counters
            .entry(provider.to_string())
            .or_insert_with(|| WindowCounters::opened_at(now));
        window.roll(now);

        if let Some(limit) = quota.per_second {
            if window.second_count + count > u64::from(limit) {
                debug!(
                    "Rate limit hit for provider {} (second): {} + {} > {}",
                    provider, window.second_count, count, limit
                );
                return false;
            }
        }

        if let Some(limit) = quota.per_hour {
            if window.hour_count + count > u64::from(limit) {
                debug!(
                    "Rate limit hit for provider {} (hour): {} + {} > {}",
                    provider, window.hour_count, count, limit
                );
                return false;
            }
        }

        window.second_count += count;
        window.hour_count += count;
        true
    }

    /// Remaining quota for a provider right now
    pub async fn remaining(&self, provider: &str) -> RemainingQuota {
        self.remaining_at(provider, Utc::now()).await
    }

    /// Remaining quota for a provider at the given instant
    pub async fn remaining_at(&self, provider: &str, now: DateTime<Utc>) -> RemainingQuota {
        let quota = self.limits.get(provider).copied().unwrap_or_default();

        let mut window = self
            .counters
            .lock()
            .await
            .get(provider)
            .copied()
            .unwrap_or_else(|| WindowCounters::opened_at(now));
        window.roll(now);

        RemainingQuota {
            per_second: quota
                .per_second
                .map(|limit| u64::from(limit).saturating_sub(window.second_count)),
            per_hour: quota
                .per_hour
                .map(|limit| u64::from(limit).saturating_sub(window.hour_count)),
        }
    }
}

/// Remaining quota for a provider; `None` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingQuota {
    pub per_second: Option<u64>,
    pub per_hour: Option<u64>,
}

impl RemainingQuota {
    /// Smallest remaining count across windows
    pub fn min(&self) -> Option<u64> {
        match (self.per_second, self.per_hour) {
            (Some(second), Some(hour)) => Some(second.min(hour)),
            (Some(second), None) => Some(second),
            (None, hour) => hour,
        }
    }
}
