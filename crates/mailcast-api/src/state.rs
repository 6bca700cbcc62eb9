//! Shared application state

use mailcast_core::DeliveryOrchestrator;
use mailcast_storage::DatabasePool;
use std::sync::Arc;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeliveryOrchestrator>,
    /// Present when running against PostgreSQL; checked by readiness
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self {
            orchestrator,
            db_pool: None,
        }
    }

    pub fn with_db_pool(mut self, db_pool: DatabasePool) -> Self {
        self.db_pool = Some(db_pool);
        self
    }
}
