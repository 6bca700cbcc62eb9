//! Mailcast - Campaign delivery service entry point

use anyhow::{bail, Context, Result};
use mailcast_api::{create_router, AppState};
use mailcast_common::config::{Config, LoggingConfig};
use mailcast_core::{
    DeliveryMetrics, DeliveryOrchestrator, DeliverySettings, EspRegistry, Repositories,
};
use mailcast_storage::{
    DatabasePool, InMemoryCampaignRepository, InMemoryDeliveryEventRepository,
    InMemoryDeliveryReportRepository, InMemorySubscriberRepository, PgCampaignRepository,
    PgDeliveryEventRepository, PgDeliveryReportRepository, PgSubscriberRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Mailcast delivery service...");

    // Initialize storage
    let (repositories, db_pool) = init_storage(&config).await?;

    // Initialize providers
    let send_timeout = Duration::from_millis(config.delivery.send_timeout_ms);
    let registry = EspRegistry::from_config(&config.providers, send_timeout);
    if !registry.has_active() {
        warn!("No active ESP providers configured; deliveries will be rejected");
    }
    for provider in registry.providers() {
        info!(
            provider = %provider.name,
            family = %provider.family,
            primary = provider.is_primary,
            active = provider.is_active,
            "ESP provider registered"
        );
    }
    let rate_limiter = Arc::new(registry.rate_limiter());

    let metrics = DeliveryMetrics::new().context("Failed to register metrics")?;

    let orchestrator = Arc::new(
        DeliveryOrchestrator::new(repositories, Arc::new(registry), rate_limiter, metrics)
            .with_settings(DeliverySettings::from(&config.delivery)),
    );

    let mut state = AppState::new(orchestrator.clone());
    if let Some(db_pool) = db_pool {
        state = state.with_db_pool(db_pool);
    }

    // Start API server
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind API server to {}", config.server.bind_address))?;
    info!("Starting API server on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await
        .context("API server error")?;

    info!("Mailcast shutdown complete");

    Ok(())
}

async fn init_storage(config: &Config) -> Result<(Repositories, Option<DatabasePool>)> {
    match config.database.backend.as_str() {
        "postgres" => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;

            let pool = db_pool.pool().clone();
            let repositories = Repositories {
                campaigns: Arc::new(PgCampaignRepository::new(pool.clone())),
                subscribers: Arc::new(PgSubscriberRepository::new(pool.clone())),
                events: Arc::new(PgDeliveryEventRepository::new(pool.clone())),
                reports: Arc::new(PgDeliveryReportRepository::new(pool)),
            };
            Ok((repositories, Some(db_pool)))
        }
        "memory" => {
            warn!("Using in-memory storage; delivery state is lost on restart");
            let repositories = Repositories {
                campaigns: Arc::new(InMemoryCampaignRepository::new()),
                subscribers: Arc::new(InMemorySubscriberRepository::new()),
                events: Arc::new(InMemoryDeliveryEventRepository::new()),
                reports: Arc::new(InMemoryDeliveryReportRepository::new()),
            };
            Ok((repositories, None))
        }
        other => bail!("Unsupported database backend: {}", other),
    }
}

/// Resolve on Ctrl-C, aborting deliveries that are still running
async fn shutdown_signal(orchestrator: Arc<DeliveryOrchestrator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");

    for campaign_id in orchestrator.in_flight() {
        orchestrator.abort_campaign(campaign_id);
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailcast=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
