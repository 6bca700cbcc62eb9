//! Retry policy for transient provider failures

use mailcast_common::config::RetryConfig;
use std::time::Duration;

use super::gateway::SendFailure;

/// How often a batch is retried against the same provider before failover
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt per provider
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }

    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: if config.multiplier >= 1.0 {
                config.multiplier
            } else {
                1.0
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt should follow failed attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32, failure: &SendFailure) -> bool {
        attempt < self.max_attempts && failure.kind.is_retryable()
    }

    /// Wait before the attempt following failed attempt number `attempt`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::gateway::FailureKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_only_transient_failures_retry() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);

        let network = SendFailure::new(FailureKind::Network, "connection reset");
        let server = SendFailure::new(FailureKind::Provider, "502 bad gateway").with_status(502);
        let limited = SendFailure::new(FailureKind::RateLimited, "too many requests");
        let auth = SendFailure::new(FailureKind::Auth, "invalid api key");

        assert!(policy.should_retry(1, &network));
        assert!(policy.should_retry(2, &server));
        assert!(!policy.should_retry(3, &network));
        assert!(!policy.should_retry(1, &limited));
        assert!(!policy.should_retry(1, &auth));
    }

    #[test]
    fn test_default_never_retries() {
        let policy = RetryPolicy::default();
        let network = SendFailure::new(FailureKind::Network, "timeout");
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1, &network));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        });
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
    }
}
