//! Campaign repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::{CampaignId, CampaignStatus};
use mailcast_common::{Error, Result};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::db_error;
use crate::models::Campaign;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Load a campaign by id
    async fn load(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Insert or replace a campaign
    async fn save(&self, campaign: &Campaign) -> Result<()>;

    /// Move a campaign to a new lifecycle status
    ///
    /// Entering `sending` stamps `started_at`, entering a terminal status
    /// stamps `completed_at`.
    async fn update_status(&self, id: CampaignId, status: CampaignStatus) -> Result<()>;

    /// Move a `draft` campaign to `sending`
    ///
    /// Returns false, leaving the campaign untouched, when it is missing or
    /// not in `draft`.
    async fn start_sending(&self, id: CampaignId) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    subject: String,
    html_body: Option<String>,
    text_body: Option<String>,
    from_name: Option<String>,
    from_email: String,
    reply_to: Option<String>,
    list_ids: Vec<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let status = row.status.parse::<CampaignStatus>().map_err(Error::Storage)?;
        Ok(Campaign {
            id: row.id,
            name: row.name,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            from_name: row.from_name,
            from_email: row.from_email,
            reply_to: row.reply_to,
            list_ids: row.list_ids,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// PostgreSQL campaign repository
#[derive(Clone)]
pub struct PgCampaignRepository {
    pool: PgPool,
}

impl PgCampaignRepository {
    /// Create a new campaign repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for PgCampaignRepository {
    async fn load(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(Campaign::try_from).transpose()
    }

    async fn save(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, subject, html_body, text_body, from_name, from_email,
                reply_to, list_ids, status, created_at, updated_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                subject = EXCLUDED.subject,
                html_body = EXCLUDED.html_body,
                text_body = EXCLUDED.text_body,
                from_name = EXCLUDED.from_name,
                from_email = EXCLUDED.from_email,
                reply_to = EXCLUDED.reply_to,
                list_ids = EXCLUDED.list_ids,
                status = EXCLUDED.status,
                updated_at = NOW(),
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.html_body)
        .bind(&campaign.text_body)
        .bind(&campaign.from_name)
        .bind(&campaign.from_email)
        .bind(&campaign.reply_to)
        .bind(&campaign.list_ids)
        .bind(campaign.status.to_string())
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .bind(campaign.started_at)
        .bind(campaign.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_status(&self, id: CampaignId, status: CampaignStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $2,
                updated_at = NOW(),
                started_at = CASE WHEN $2 = 'sending' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("campaign {}", id)));
        }

        Ok(())
    }

    async fn start_sending(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = 'sending',
                updated_at = NOW(),
                started_at = NOW()
            WHERE id = $1 AND status = 'draft'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }
}
