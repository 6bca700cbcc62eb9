//! Subscriber repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::SubscriberStatus;
use mailcast_common::{Error, Result};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::db_error;
use crate::models::{Campaign, Subscriber};

/// Subscriber repository trait
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Active subscribers of every list the campaign targets
    ///
    /// The result is deduplicated by email address (case-insensitive, first
    /// membership wins) and ordered by subscription time so that batch
    /// boundaries are reproducible.
    async fn list_active_for_campaign(&self, campaign: &Campaign) -> Result<Vec<Subscriber>>;
}

#[derive(Debug, FromRow)]
struct SubscriberRow {
    id: Uuid,
    list_id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    custom_fields: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = Error;

    fn try_from(row: SubscriberRow) -> Result<Self> {
        let status = row.status.parse::<SubscriberStatus>().map_err(Error::Storage)?;
        Ok(Subscriber {
            id: row.id,
            list_id: row.list_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            custom_fields: row.custom_fields,
            status,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL subscriber repository
#[derive(Clone)]
pub struct PgSubscriberRepository {
    pool: PgPool,
}

impl PgSubscriberRepository {
    /// Create a new subscriber repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRepository for PgSubscriberRepository {
    async fn list_active_for_campaign(&self, campaign: &Campaign) -> Result<Vec<Subscriber>> {
        if campaign.list_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, SubscriberRow>(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (lower(email)) *
                FROM subscribers
                WHERE list_id = ANY($1) AND status = 'active'
                ORDER BY lower(email), created_at, id
            ) s
            ORDER BY created_at, id
            "#,
        )
        .bind(&campaign.list_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Subscriber::try_from).collect()
    }
}
