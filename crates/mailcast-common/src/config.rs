//! Configuration for Mailcast

use crate::types::ProviderFamily;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Delivery engine configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// ESP providers, in priority order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Delivery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Subscribers per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between two batches of the same campaign
    #[serde(default = "default_delay_between_batches")]
    pub delay_between_batches_ms: u64,

    /// Timeout for a single ESP request
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Retry policy for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_between_batches_ms: default_delay_between_batches(),
            send_timeout_ms: default_send_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_delay_between_batches() -> u64 {
    1000
}

fn default_send_timeout() -> u64 {
    15_000
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts against one provider before failing over (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// ESP provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name
    pub name: String,

    /// API family
    pub family: ProviderFamily,

    /// API key used as the credential handle
    pub api_key: String,

    /// Override of the provider API base URL
    pub base_url: Option<String>,

    /// Primary provider is tried first
    #[serde(default)]
    pub is_primary: bool,

    /// Inactive providers are never selected
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Explicit ordering among non-primary providers (lower first)
    #[serde(default)]
    pub priority: i32,

    /// Messages per second (unlimited when unset)
    pub per_second: Option<u32>,

    /// Messages per hour (unlimited when unset)
    pub per_hour: Option<u32>,

    /// Secret used to verify inbound webhook signatures
    pub webhook_secret: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MAILCAST_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("MAILCAST_CONFIG") {
            return Self::from_file(&PathBuf::from(path));
        }

        let paths = [
            PathBuf::from("./mailcast.toml"),
            PathBuf::from("/etc/mailcast/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.delivery.batch_size == 0 {
            return Err(crate::Error::Config(
                "delivery.batch_size must be greater than zero".to_string(),
            ));
        }

        if self.delivery.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "delivery.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        // The Resend batch endpoint takes at most 100 messages per call
        if self.delivery.batch_size > 100
            && self
                .providers
                .iter()
                .any(|p| p.family == ProviderFamily::Resend)
        {
            return Err(crate::Error::Config(
                "delivery.batch_size must not exceed 100 with a resend provider".to_string(),
            ));
        }

        let primaries = self.providers.iter().filter(|p| p.is_primary).count();
        if primaries > 1 {
            return Err(crate::Error::Config(
                "At most one provider may be marked primary".to_string(),
            ));
        }

        Ok(())
    }
}
