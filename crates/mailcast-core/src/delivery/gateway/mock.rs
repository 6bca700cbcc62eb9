//! Mock gateway for testing and the in-memory backend

use super::{Credentials, EspGateway, EspSendResult, FailureKind};
use async_trait::async_trait;
use mailcast_common::types::{ProviderFamily, SubscriberId};
use mailcast_storage::models::{Campaign, Subscriber};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// Gateway that records every batch and answers from a script
///
/// Scripted results are consumed in order; once the script is empty the
/// fallback result is used for every call.
pub struct MockGateway {
    family: ProviderFamily,
    script: Mutex<VecDeque<EspSendResult>>,
    fallback: Option<EspSendResult>,
    calls: Mutex<Vec<Vec<SubscriberId>>>,
    delay: Option<Duration>,
}

impl MockGateway {
    /// Gateway that accepts every batch
    pub fn new(family: ProviderFamily) -> Self {
        Self {
            family,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Gateway that fails every batch
    pub fn failing(family: ProviderFamily, kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(family).with_fallback(EspSendResult::failed(kind, message))
    }

    /// Result used once the script runs out
    pub fn with_fallback(mut self, result: EspSendResult) -> Self {
        self.fallback = Some(result);
        self
    }

    /// Results for the next calls, in order
    pub fn with_script(mut self, results: impl IntoIterator<Item = EspSendResult>) -> Self {
        self.script.get_mut().extend(results);
        self
    }

    /// Wait before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Subscriber ids of every batch received, in call order
    pub async fn calls(&self) -> Vec<Vec<SubscriberId>> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl EspGateway for MockGateway {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn send(
        &self,
        _campaign: &Campaign,
        batch: &[Subscriber],
        _credentials: &Credentials,
    ) -> EspSendResult {
        self.calls
            .lock()
            .await
            .push(batch.iter().map(|s| s.id).collect());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.script.lock().await.pop_front() {
            return result;
        }

        match &self.fallback {
            Some(result) => result.clone(),
            None => EspSendResult::sent(
                batch
                    .iter()
                    .map(|s| format!("mock-{}-{}", self.family, s.id))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let gateway = MockGateway::new(ProviderFamily::Resend)
            .with_script(vec![EspSendResult::failed(FailureKind::Network, "reset")]);
        let campaign = Campaign::draft("c", "s", "a@example.com", vec![]);
        let batch = vec![Subscriber::active(Uuid::new_v4(), "x@example.com")];
        let credentials = Credentials::new("k");

        assert!(!gateway.send(&campaign, &batch, &credentials).await.is_success());
        assert!(gateway.send(&campaign, &batch, &credentials).await.is_success());
        assert_eq!(gateway.call_count().await, 2);
        assert_eq!(gateway.calls().await[0], vec![batch[0].id]);
    }
}
