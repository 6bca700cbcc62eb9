//! Delivery metrics
//!
//! Counters live in a registry owned by this struct rather than the global
//! default registry, so independent engines (and tests) never collide.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters for the delivery engine
#[derive(Clone)]
pub struct DeliveryMetrics {
    registry: Registry,
    messages_sent: IntCounterVec,
    messages_failed: IntCounter,
    provider_failures: IntCounterVec,
    webhook_events: IntCounterVec,
    batches: IntCounterVec,
}

impl DeliveryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_sent = IntCounterVec::new(
            Opts::new(
                "mailcast_messages_sent_total",
                "Messages accepted by a provider",
            ),
            &["provider"],
        )?;
        let messages_failed = IntCounter::new(
            "mailcast_messages_failed_total",
            "Messages no provider accepted",
        )?;
        let provider_failures = IntCounterVec::new(
            Opts::new(
                "mailcast_provider_failures_total",
                "Failed provider calls by failure kind",
            ),
            &["provider", "kind"],
        )?;
        let webhook_events = IntCounterVec::new(
            Opts::new(
                "mailcast_webhook_events_total",
                "Inbound webhook events by outcome",
            ),
            &["provider", "outcome"],
        )?;
        let batches = IntCounterVec::new(
            Opts::new("mailcast_batches_total", "Dispatched batches by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(messages_failed.clone()))?;
        registry.register(Box::new(provider_failures.clone()))?;
        registry.register(Box::new(webhook_events.clone()))?;
        registry.register(Box::new(batches.clone()))?;

        Ok(Self {
            registry,
            messages_sent,
            messages_failed,
            provider_failures,
            webhook_events,
            batches,
        })
    }

    pub fn batch_sent(&self, provider: &str, messages: usize) {
        self.messages_sent
            .with_label_values(&[provider])
            .inc_by(messages as u64);
        self.batches.with_label_values(&["sent"]).inc();
    }

    pub fn batch_failed(&self, messages: usize) {
        self.messages_failed.inc_by(messages as u64);
        self.batches.with_label_values(&["failed"]).inc();
    }

    pub fn provider_failure(&self, provider: &str, kind: &str) {
        self.provider_failures
            .with_label_values(&[provider, kind])
            .inc();
    }

    pub fn webhook_event(&self, provider: &str, outcome: &str) {
        self.webhook_events
            .with_label_values(&[provider, outcome])
            .inc();
    }

    /// Render every counter in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = DeliveryMetrics::new().unwrap();
        metrics.batch_sent("resend-main", 50);
        metrics.batch_failed(20);
        metrics.provider_failure("resend-main", "rate_limited");
        metrics.webhook_event("sendgrid", "accepted");

        let output = metrics.render();
        assert!(output.contains("mailcast_messages_sent_total{provider=\"resend-main\"} 50"));
        assert!(output.contains("mailcast_messages_failed_total 20"));
        assert!(output.contains("kind=\"rate_limited\""));
        assert!(output.contains("outcome=\"accepted\""));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = DeliveryMetrics::new().unwrap();
        let b = DeliveryMetrics::new().unwrap();
        a.batch_failed(1);
        assert!(!b.render().contains("mailcast_messages_failed_total 1"));
    }
}
