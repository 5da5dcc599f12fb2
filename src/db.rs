use crate::models::{AdAccount, Campaign, CampaignStatus, DailyMetric, DateRange, UserSettings};
use crate::store::{CampaignUpsert, DatabaseError, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::str::FromStr;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, Row};

const SCHEMA: &str = include_str!("schema.sql");

const CAMPAIGN_COLUMNS: &str =
    "c.id, c.name, c.status, c.created_at, c.account_id, c.green_max, c.yellow_max";

const USER_COLUMNS: &str = "id, green_max, yellow_max, meta_access_token, meta_token_expiry";

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, DatabaseError> {
        // Configure SSL
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_verify(SslVerifyMode::NONE); // managed Postgres hosts present self-signed chains
        let connector = MakeTlsConnector::new(builder.build());

        // Parse the connection config from URL
        let mut config = Config::from_str(database_url)
            .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;

        let (client, connection) = config
            .connect_timeout(std::time::Duration::from_secs(5))
            .connect(connector)
            .await?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "database connection closed");
            }
        });

        Ok(Self { client })
    }

    /// Applies the schema. Safe to run on every start.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

fn campaign_from_row(row: &Row) -> Campaign {
    let status: String = row.get(2);
    Campaign {
        id: row.get(0),
        name: row.get(1),
        status: CampaignStatus::from(status.as_str()),
        created_at: row.get(3),
        account_id: row.get(4),
        green_max: row.get(5),
        yellow_max: row.get(6),
    }
}

fn user_from_row(row: &Row) -> UserSettings {
    UserSettings {
        id: row.get(0),
        green_max: row.get(1),
        yellow_max: row.get(2),
        meta_access_token: row.get(3),
        meta_token_expiry: row.get(4),
    }
}

fn metric_from_row(row: &Row) -> DailyMetric {
    DailyMetric {
        campaign_id: row.get(0),
        date: row.get(1),
        spend: row.get(2),
        impressions: row.get(3),
        clicks: row.get(4),
        ctr: row.get(5),
        cpc: row.get(6),
        conversions: row.get(7),
        conv_price: row.get(8),
    }
}

// A foreign key violation on insert means the named owner row is absent.
fn missing_parent(code: Option<&SqlState>, entity: &'static str, id: &str) -> Option<DatabaseError> {
    (code == Some(&SqlState::FOREIGN_KEY_VIOLATION)).then(|| DatabaseError::MissingParent {
        entity,
        id: id.to_string(),
    })
}

fn write_error(err: tokio_postgres::Error, entity: &'static str, id: &str) -> DatabaseError {
    missing_parent(err.code(), entity, id).unwrap_or(DatabaseError::Postgres(err))
}

#[async_trait]
impl Store for Database {
    async fn upsert_ad_account(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
    ) -> Result<(), DatabaseError> {
        self.client
            .execute(
                "INSERT INTO ad_accounts (id, name, user_id)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
                &[&id, &name, &user_id],
            )
            .await
            .map_err(|e| write_error(e, "user", user_id))?;

        Ok(())
    }

    async fn upsert_campaign(
        &self,
        account_id: &str,
        campaign: &CampaignUpsert,
    ) -> Result<(), DatabaseError> {
        self.client
            .execute(
                "INSERT INTO campaigns (id, name, status, created_at, account_id)
                 VALUES ($1, $2, $3, COALESCE($4::timestamptz, NOW()), $5)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    status = EXCLUDED.status,
                    created_at = COALESCE($4::timestamptz, campaigns.created_at)",
                &[
                    &campaign.id,
                    &campaign.name,
                    &campaign.status.as_str(),
                    &campaign.created_at,
                    &account_id,
                ],
            )
            .await
            .map_err(|e| write_error(e, "ad account", account_id))?;

        Ok(())
    }

    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<(), DatabaseError> {
        self.client
            .execute(
                "INSERT INTO daily_metrics
                    (campaign_id, date, spend, impressions, clicks, ctr, cpc, conversions, conv_price)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (campaign_id, date) DO UPDATE SET
                    spend = EXCLUDED.spend,
                    impressions = EXCLUDED.impressions,
                    clicks = EXCLUDED.clicks,
                    ctr = EXCLUDED.ctr,
                    cpc = EXCLUDED.cpc,
                    conversions = EXCLUDED.conversions,
                    conv_price = EXCLUDED.conv_price",
                &[
                    &metric.campaign_id,
                    &metric.date,
                    &metric.spend,
                    &metric.impressions,
                    &metric.clicks,
                    &metric.ctr,
                    &metric.cpc,
                    &metric.conversions,
                    &metric.conv_price,
                ],
            )
            .await
            .map_err(|e| write_error(e, "campaign", &metric.campaign_id))?;

        Ok(())
    }

    async fn ad_account(&self, id: &str) -> Result<Option<AdAccount>, DatabaseError> {
        let row = self
            .client
            .query_opt("SELECT id, name, user_id FROM ad_accounts WHERE id = $1", &[&id])
            .await?;

        Ok(row.map(|row| AdAccount {
            id: row.get(0),
            name: row.get(1),
            user_id: row.get(2),
        }))
    }

    async fn ad_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, DatabaseError> {
        let rows = self
            .client
            .query(
                "SELECT id, name, user_id FROM ad_accounts WHERE user_id = $1 ORDER BY id",
                &[&user_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| AdAccount {
                id: row.get(0),
                name: row.get(1),
                user_id: row.get(2),
            })
            .collect())
    }

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns c WHERE c.id = $1"),
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(campaign_from_row))
    }

    async fn campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS}
                     FROM campaigns c
                     INNER JOIN ad_accounts a ON c.account_id = a.id
                     WHERE a.user_id = $1
                     ORDER BY c.created_at DESC, c.id"
                ),
                &[&user_id],
            )
            .await?;

        Ok(rows.iter().map(campaign_from_row).collect())
    }

    async fn daily_metrics(
        &self,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<Vec<DailyMetric>, DatabaseError> {
        let rows = self
            .client
            .query(
                "SELECT campaign_id, date, spend, impressions, clicks, ctr, cpc, conversions, conv_price
                 FROM daily_metrics
                 WHERE campaign_id = $1
                   AND ($2::date IS NULL OR date >= $2::date)
                   AND ($3::date IS NULL OR date <= $3::date)
                 ORDER BY date",
                &[&campaign_id, &range.from, &range.to],
            )
            .await?;

        Ok(rows.iter().map(metric_from_row).collect())
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
                &[&user_id],
            )
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn users_with_token(&self) -> Result<Vec<UserSettings>, DatabaseError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE meta_access_token IS NOT NULL
                     ORDER BY id"
                ),
                &[],
            )
            .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn set_user_thresholds(
        &self,
        user_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .client
            .execute(
                "UPDATE users SET green_max = $2, yellow_max = $3 WHERE id = $1",
                &[&user_id, &green_max, &yellow_max],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn set_campaign_thresholds(
        &self,
        campaign_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .client
            .execute(
                "UPDATE campaigns SET green_max = $2, yellow_max = $3 WHERE id = $1",
                &[&campaign_id, &green_max, &yellow_max],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn set_access_token(
        &self,
        user_id: &str,
        token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .client
            .execute(
                "UPDATE users SET meta_access_token = $2, meta_token_expiry = $3 WHERE id = $1",
                &[&user_id, &token, &expiry],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn delete_ad_accounts(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let deleted = self
            .client
            .execute("DELETE FROM ad_accounts WHERE user_id = $1", &[&user_id])
            .await?;

        Ok(deleted)
    }

    async fn log_error(&self, message: &str) -> Result<(), DatabaseError> {
        self.client
            .execute(
                "INSERT INTO error_logs (message, created_at) VALUES ($1, NOW())",
                &[&message],
            )
            .await?;

        Ok(())
    }
}
