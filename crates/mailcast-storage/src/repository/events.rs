//! Delivery event repository (append-only)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{CampaignId, DeliveryEventType};
use mailcast_common::{Error, Result};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::db_error;
use crate::models::DeliveryEvent;

/// Delivery event repository trait
#[async_trait]
pub trait DeliveryEventRepository: Send + Sync {
    /// Append one event to the log
    async fn append_event(&self, event: &DeliveryEvent) -> Result<()>;

    /// Append several events, preserving their order
    async fn append_events(&self, events: &[DeliveryEvent]) -> Result<()> {
        for event in events {
            self.append_event(event).await?;
        }
        Ok(())
    }

    /// All events recorded for a campaign, oldest first
    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryEvent>>;
}

#[derive(Debug, FromRow)]
struct DeliveryEventRow {
    id: Uuid,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    event_type: String,
    provider: Option<String>,
    message_id: Option<String>,
    occurred_at: DateTime<Utc>,
    raw_payload: serde_json::Value,
}

impl TryFrom<DeliveryEventRow> for DeliveryEvent {
    type Error = Error;

    fn try_from(row: DeliveryEventRow) -> Result<Self> {
        let event_type = row
            .event_type
            .parse::<DeliveryEventType>()
            .map_err(Error::Storage)?;
        Ok(DeliveryEvent {
            id: row.id,
            campaign_id: row.campaign_id,
            subscriber_id: row.subscriber_id,
            event_type,
            provider: row.provider,
            message_id: row.message_id,
            occurred_at: row.occurred_at,
            raw_payload: row.raw_payload,
        })
    }
}

/// PostgreSQL delivery event repository
#[derive(Clone)]
pub struct PgDeliveryEventRepository {
    pool: PgPool,
}

impl PgDeliveryEventRepository {
    /// Create a new delivery event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_EVENT: &str = r#"
    INSERT INTO delivery_events (
        id, campaign_id, subscriber_id, event_type, provider, message_id, occurred_at, raw_payload
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

#[async_trait]
impl DeliveryEventRepository for PgDeliveryEventRepository {
    async fn append_event(&self, event: &DeliveryEvent) -> Result<()> {
        sqlx::query(INSERT_EVENT)
            .bind(event.id)
            .bind(event.campaign_id)
            .bind(event.subscriber_id)
            .bind(event.event_type.to_string())
            .bind(&event.provider)
            .bind(&event.message_id)
            .bind(event.occurred_at)
            .bind(&event.raw_payload)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn append_events(&self, events: &[DeliveryEvent]) -> Result<()> {
        // One transaction per batch of sends
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for event in events {
            sqlx::query(INSERT_EVENT)
                .bind(event.id)
                .bind(event.campaign_id)
                .bind(event.subscriber_id)
                .bind(event.event_type.to_string())
                .bind(&event.provider)
                .bind(&event.message_id)
                .bind(event.occurred_at)
                .bind(&event.raw_payload)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DeliveryEvent>> {
        let rows = sqlx::query_as::<_, DeliveryEventRow>(
            r#"
            SELECT id, campaign_id, subscriber_id, event_type, provider, message_id,
                   occurred_at, raw_payload
            FROM delivery_events
            WHERE campaign_id = $1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(DeliveryEvent::try_from).collect()
    }
}
