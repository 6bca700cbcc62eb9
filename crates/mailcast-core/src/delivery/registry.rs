//! ESP Registry - Configured providers in selection order

use super::gateway::{Credentials, EspGateway, ResendGateway, SendGridGateway};
use super::rate_limiter::{ProviderQuota, RateLimiter, RemainingQuota};
use mailcast_common::config::ProviderConfig;
use mailcast_common::types::ProviderFamily;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A configured provider account
#[derive(Clone)]
pub struct EspProvider {
    pub name: String,
    pub family: ProviderFamily,
    pub is_primary: bool,
    pub is_active: bool,
    /// Ordering among non-primary providers (lower first)
    pub priority: i32,
    pub quota: ProviderQuota,
    pub credentials: Credentials,
    /// Secret for inbound webhook signatures
    pub webhook_secret: Option<String>,
    pub gateway: Arc<dyn EspGateway>,
}

impl EspProvider {
    pub fn new(
        name: impl Into<String>,
        gateway: Arc<dyn EspGateway>,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.into(),
            family: gateway.family(),
            is_primary: false,
            is_active: true,
            priority: 0,
            quota: ProviderQuota::default(),
            credentials,
            webhook_secret: None,
            gateway,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_quota(mut self, quota: ProviderQuota) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Build a provider talking to the real API of its family
    pub fn from_config(config: &ProviderConfig, timeout: Duration) -> Self {
        let gateway: Arc<dyn EspGateway> = match config.family {
            ProviderFamily::Resend => {
                let gateway = ResendGateway::new(timeout);
                match &config.base_url {
                    Some(url) => Arc::new(gateway.with_base_url(url)),
                    None => Arc::new(gateway),
                }
            }
            ProviderFamily::SendGrid => {
                let gateway = SendGridGateway::new(timeout);
                match &config.base_url {
                    Some(url) => Arc::new(gateway.with_base_url(url)),
                    None => Arc::new(gateway),
                }
            }
        };

        Self {
            name: config.name.clone(),
            family: config.family,
            is_primary: config.is_primary,
            is_active: config.is_active,
            priority: config.priority,
            quota: ProviderQuota::new(config.per_second, config.per_hour),
            credentials: Credentials::new(config.api_key.clone()),
            webhook_secret: config.webhook_secret.clone(),
            gateway,
        }
    }
}

/// Provider configuration as exposed to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EspProviderInfo {
    pub name: String,
    pub family: ProviderFamily,
    pub is_active: bool,
    pub is_primary: bool,
    pub priority: i32,
    pub per_second_limit: Option<u32>,
    pub per_hour_limit: Option<u32>,
    /// Quota left in the current windows, for rate-limited providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<RemainingQuota>,
}

/// Registry of providers, ordered primary first and then by priority
#[derive(Clone, Default)]
pub struct EspRegistry {
    providers: Vec<EspProvider>,
}

impl EspRegistry {
    pub fn new(mut providers: Vec<EspProvider>) -> Self {
        // Stable sort keeps configuration order among equal priorities
        providers.sort_by_key(|p| (!p.is_primary, p.priority));
        Self { providers }
    }

    /// Build the registry from provider configuration
    pub fn from_config(configs: &[ProviderConfig], timeout: Duration) -> Self {
        Self::new(
            configs
                .iter()
                .map(|c| EspProvider::from_config(c, timeout))
                .collect(),
        )
    }

    /// Every configured provider, in selection order
    pub fn providers(&self) -> &[EspProvider] {
        &self.providers
    }

    /// Active providers in the order they are tried
    pub fn active(&self) -> impl Iterator<Item = &EspProvider> {
        self.providers.iter().filter(|p| p.is_active)
    }

    pub fn has_active(&self) -> bool {
        self.providers.iter().any(|p| p.is_active)
    }

    pub fn get(&self, name: &str) -> Option<&EspProvider> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Providers of one API family
    pub fn by_family(&self, family: ProviderFamily) -> impl Iterator<Item = &EspProvider> {
        self.providers.iter().filter(move |p| p.family == family)
    }

    /// Rate limiter carrying every provider's quota
    pub fn rate_limiter(&self) -> RateLimiter {
        self.providers
            .iter()
            .fold(RateLimiter::new(), |limiter, p| {
                limiter.with_limit(p.name.clone(), p.quota)
            })
    }

    /// Provider configuration, in selection order
    pub fn configuration(&self) -> Vec<EspProviderInfo> {
        self.providers
            .iter()
            .map(|p| EspProviderInfo {
                name: p.name.clone(),
                family: p.family,
                is_active: p.is_active,
                is_primary: p.is_primary,
                priority: p.priority,
                per_second_limit: p.quota.per_second,
                per_hour_limit: p.quota.per_hour,
                remaining: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::gateway::MockGateway;
    use pretty_assertions::assert_eq;

    fn provider(name: &str) -> EspProvider {
        EspProvider::new(
            name,
            Arc::new(MockGateway::new(ProviderFamily::Resend)),
            Credentials::new("k"),
        )
    }

    fn names<'a>(providers: impl Iterator<Item = &'a EspProvider>) -> Vec<&'a str> {
        providers.map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_primary_first_then_priority() {
        let registry = EspRegistry::new(vec![
            provider("c").with_priority(2),
            provider("b").with_priority(1),
            provider("a").with_priority(5).primary(),
            provider("d").with_priority(1),
        ]);

        assert_eq!(names(registry.active()), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_inactive_providers_are_skipped() {
        let registry = EspRegistry::new(vec![
            provider("a").primary().inactive(),
            provider("b"),
        ]);

        assert_eq!(names(registry.active()), vec!["b"]);
        assert!(registry.has_active());
        assert_eq!(registry.configuration().len(), 2);

        let none = EspRegistry::new(vec![provider("a").inactive()]);
        assert!(!none.has_active());
    }

    #[test]
    fn test_configuration_lists_quotas() {
        let registry = EspRegistry::new(vec![
            provider("a").primary().with_quota(ProviderQuota::new(Some(10), Some(5000)))
        ]);

        let info = &registry.configuration()[0];
        assert!(info.is_primary);
        assert!(info.is_active);
        assert_eq!(info.per_second_limit, Some(10));
        assert_eq!(info.per_hour_limit, Some(5000));
        assert_eq!(
            registry.rate_limiter().limit_for("a"),
            Some(ProviderQuota::new(Some(10), Some(5000)))
        );
    }

    #[test]
    fn test_from_config() {
        let config = ProviderConfig {
            name: "sg".to_string(),
            family: ProviderFamily::SendGrid,
            api_key: "SG.x".to_string(),
            base_url: Some("http://localhost:9999".to_string()),
            is_primary: false,
            is_active: true,
            priority: 3,
            per_second: None,
            per_hour: Some(100),
            webhook_secret: None,
        };

        let registry = EspRegistry::from_config(&[config], Duration::from_secs(1));
        let provider = registry.get("sg").unwrap();
        assert_eq!(provider.family, ProviderFamily::SendGrid);
        assert_eq!(provider.gateway.family(), ProviderFamily::SendGrid);
        assert_eq!(provider.priority, 3);
        assert_eq!(registry.by_family(ProviderFamily::Resend).count(), 0);
    }
}
