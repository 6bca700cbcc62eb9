//! Delivery report repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailcast_common::types::CampaignId;
use mailcast_common::Result;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::db_error;
use crate::models::{DeliveryReport, ErrorBucket};

/// Delivery report repository trait
#[async_trait]
pub trait DeliveryReportRepository: Send + Sync {
    /// Store the latest report snapshot for a campaign
    async fn save_report(&self, report: &DeliveryReport) -> Result<()>;

    /// Latest report snapshot for a campaign
    async fn load_report(&self, campaign_id: CampaignId) -> Result<Option<DeliveryReport>>;
}

#[derive(Debug, FromRow)]
struct DeliveryReportRow {
    campaign_id: Uuid,
    total_subscribers: i64,
    sent: i64,
    failed: i64,
    pending: i64,
    success_rate: f64,
    error_histogram: Json<Vec<ErrorBucket>>,
    generated_at: DateTime<Utc>,
}

impl From<DeliveryReportRow> for DeliveryReport {
    fn from(row: DeliveryReportRow) -> Self {
        DeliveryReport {
            campaign_id: row.campaign_id,
            total_subscribers: row.total_subscribers.max(0) as u64,
            sent: row.sent.max(0) as u64,
            failed: row.failed.max(0) as u64,
            pending: row.pending.max(0) as u64,
            success_rate: row.success_rate,
            error_histogram: row.error_histogram.0,
            generated_at: row.generated_at,
        }
    }
}

/// PostgreSQL delivery report repository
#[derive(Clone)]
pub struct PgDeliveryReportRepository {
    pool: PgPool,
}

impl PgDeliveryReportRepository {
    /// Create a new delivery report repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryReportRepository for PgDeliveryReportRepository {
    async fn save_report(&self, report: &DeliveryReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_reports (
                campaign_id, total_subscribers, sent, failed, pending,
                success_rate, error_histogram, generated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (campaign_id) DO UPDATE SET
                total_subscribers = EXCLUDED.total_subscribers,
                sent = EXCLUDED.sent,
                failed = EXCLUDED.failed,
                pending = EXCLUDED.pending,
                success_rate = EXCLUDED.success_rate,
                error_histogram = EXCLUDED.error_histogram,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(report.campaign_id)
        .bind(report.total_subscribers as i64)
        .bind(report.sent as i64)
        .bind(report.failed as i64)
        .bind(report.pending as i64)
        .bind(report.success_rate)
        .bind(Json(&report.error_histogram))
        .bind(report.generated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn load_report(&self, campaign_id: CampaignId) -> Result<Option<DeliveryReport>> {
        let row = sqlx::query_as::<_, DeliveryReportRow>(
            "SELECT * FROM delivery_reports WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(DeliveryReport::from))
    }
}
