//! Mailcast Storage - Repository abstraction for delivery state
//!
//! Campaigns, subscribers, the append-only delivery event log and delivery
//! report snapshots are reached only through the repository traits defined
//! here. PostgreSQL implementations back production deployments; the
//! in-memory implementations back tests and the `memory` database backend.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::{
    InMemoryCampaignRepository, InMemoryDeliveryEventRepository, InMemoryDeliveryReportRepository,
    InMemorySubscriberRepository,
};
pub use models::*;
pub use repository::*;
