use crate::models::{AdAccount, Campaign, CampaignStatus, DailyMetric, DateRange, UserSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("SSL error: {0}")]
    SslError(#[from] openssl::error::ErrorStack),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("{entity} {id} does not exist")]
    MissingParent { entity: &'static str, id: String },
}

/// Campaign fields the sync pipeline writes. `created_at` comes from the
/// platform; when absent the stored value is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignUpsert {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub created_at: Option<DateTime<Utc>>,
}

/// Every write is an upsert on the natural key, so re-running a sync is
/// idempotent. Deletes cascade user -> ad account -> campaign -> metric.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_ad_account(&self, user_id: &str, id: &str, name: &str)
        -> Result<(), DatabaseError>;

    // existing campaigns keep their account
    async fn upsert_campaign(
        &self,
        account_id: &str,
        campaign: &CampaignUpsert,
    ) -> Result<(), DatabaseError>;

    /// Replaces the whole row for `(campaign_id, date)`.
    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<(), DatabaseError>;

    async fn ad_account(&self, id: &str) -> Result<Option<AdAccount>, DatabaseError>;

    async fn ad_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, DatabaseError>;

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError>;

    /// All campaigns of the user, newest first by creation time.
    async fn campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError>;

    /// Metrics of one campaign inside `range`, ascending by date.
    async fn daily_metrics(
        &self,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<Vec<DailyMetric>, DatabaseError>;

    async fn user(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError>;

    async fn users_with_token(&self) -> Result<Vec<UserSettings>, DatabaseError>;

    /// Returns false when the user does not exist.
    async fn set_user_thresholds(
        &self,
        user_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError>;

    /// Returns false when the campaign does not exist.
    async fn set_campaign_thresholds(
        &self,
        campaign_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError>;

    async fn set_access_token(
        &self,
        user_id: &str,
        token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError>;

    /// Returns the number of accounts removed.
    async fn delete_ad_accounts(&self, user_id: &str) -> Result<u64, DatabaseError>;

    async fn log_error(&self, message: &str) -> Result<(), DatabaseError>;
}
