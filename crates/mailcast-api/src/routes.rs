//! API routes

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{campaigns, health, providers, webhooks};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    // Campaign delivery routes
    let campaign_routes = Router::new()
        .route("/:campaign_id/deliver", post(campaigns::deliver_campaign))
        .route(
            "/:campaign_id/delivery-status",
            get(campaigns::get_delivery_status),
        )
        .route("/:campaign_id/report", get(campaigns::get_report))
        .route("/:campaign_id/abort", post(campaigns::abort_campaign));

    let api_v1 = Router::new()
        .nest("/campaigns", campaign_routes)
        .route("/webhooks/:provider", post(webhooks::receive_webhook))
        .route("/esp-providers", get(providers::list_providers));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(health::metrics))
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
