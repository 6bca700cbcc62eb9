//! Mailcast API - REST API server
//!
//! This crate exposes the delivery engine over HTTP: triggering and
//! aborting campaign deliveries, reading live status and reports, provider
//! configuration, inbound ESP webhooks, health checks and metrics.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
