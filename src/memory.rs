//! In-process [`Store`] with the same keys and cascade rules as the
//! Postgres schema.

use crate::models::{
    AdAccount, Campaign, DailyMetric, DateRange, ErrorLogEntry, UserSettings,
};
use crate::store::{CampaignUpsert, DatabaseError, Store};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: BTreeMap<String, UserSettings>,
    ad_accounts: BTreeMap<String, AdAccount>,
    campaigns: BTreeMap<String, Campaign>,
    daily_metrics: BTreeMap<(String, NaiveDate), DailyMetric>,
    error_logs: Vec<ErrorLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users come from the auth layer; this stands in for it.
    pub async fn insert_user(&self, user: UserSettings) {
        self.tables.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn error_log(&self) -> Vec<ErrorLogEntry> {
        self.tables.read().await.error_logs.clone()
    }

    pub async fn metric_count(&self) -> usize {
        self.tables.read().await.daily_metrics.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_ad_account(
        &self,
        user_id: &str,
        id: &str,
        name: &str,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if let Some(account) = tables.ad_accounts.get_mut(id) {
            account.name = name.to_string();
            return Ok(());
        }
        if !tables.users.contains_key(user_id) {
            return Err(DatabaseError::MissingParent {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        tables.ad_accounts.insert(
            id.to_string(),
            AdAccount {
                id: id.to_string(),
                name: name.to_string(),
                user_id: user_id.to_string(),
            },
        );
        Ok(())
    }

    async fn upsert_campaign(
        &self,
        account_id: &str,
        campaign: &CampaignUpsert,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.campaigns.get_mut(&campaign.id) {
            existing.name = campaign.name.clone();
            existing.status = campaign.status.clone();
            if let Some(created_at) = campaign.created_at {
                existing.created_at = created_at;
            }
            return Ok(());
        }
        if !tables.ad_accounts.contains_key(account_id) {
            return Err(DatabaseError::MissingParent {
                entity: "ad account",
                id: account_id.to_string(),
            });
        }
        tables.campaigns.insert(
            campaign.id.clone(),
            Campaign {
                id: campaign.id.clone(),
                name: campaign.name.clone(),
                status: campaign.status.clone(),
                created_at: campaign.created_at.unwrap_or_else(Utc::now),
                account_id: account_id.to_string(),
                green_max: None,
                yellow_max: None,
            },
        );
        Ok(())
    }

    async fn upsert_daily_metric(&self, metric: &DailyMetric) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        if !tables.campaigns.contains_key(&metric.campaign_id) {
            return Err(DatabaseError::MissingParent {
                entity: "campaign",
                id: metric.campaign_id.clone(),
            });
        }
        tables
            .daily_metrics
            .insert((metric.campaign_id.clone(), metric.date), metric.clone());
        Ok(())
    }

    async fn ad_account(&self, id: &str) -> Result<Option<AdAccount>, DatabaseError> {
        Ok(self.tables.read().await.ad_accounts.get(id).cloned())
    }

    async fn ad_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, DatabaseError> {
        Ok(self
            .tables
            .read()
            .await
            .ad_accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn campaign(&self, id: &str) -> Result<Option<Campaign>, DatabaseError> {
        Ok(self.tables.read().await.campaigns.get(id).cloned())
    }

    async fn campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut campaigns: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| {
                tables
                    .ad_accounts
                    .get(&c.account_id)
                    .is_some_and(|a| a.user_id == user_id)
            })
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(campaigns)
    }

    async fn daily_metrics(
        &self,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<Vec<DailyMetric>, DatabaseError> {
        // BTreeMap order is (campaign, date), so rows come out date-ascending
        Ok(self
            .tables
            .read()
            .await
            .daily_metrics
            .values()
            .filter(|m| m.campaign_id == campaign_id && range.contains(m.date))
            .cloned()
            .collect())
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn users_with_token(&self) -> Result<Vec<UserSettings>, DatabaseError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|u| u.meta_access_token.is_some())
            .cloned()
            .collect())
    }

    async fn set_user_thresholds(
        &self,
        user_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(user_id) {
            Some(user) => {
                user.green_max = green_max;
                user.yellow_max = yellow_max;
                true
            }
            None => false,
        })
    }

    async fn set_campaign_thresholds(
        &self,
        campaign_id: &str,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.campaigns.get_mut(campaign_id) {
            Some(campaign) => {
                campaign.green_max = green_max;
                campaign.yellow_max = yellow_max;
                true
            }
            None => false,
        })
    }

    async fn set_access_token(
        &self,
        user_id: &str,
        token: Option<&str>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(user_id) {
            Some(user) => {
                user.meta_access_token = token.map(str::to_string);
                user.meta_token_expiry = expiry;
                true
            }
            None => false,
        })
    }

    async fn delete_ad_accounts(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.write().await;
        let Tables {
            ad_accounts,
            campaigns,
            daily_metrics,
            ..
        } = &mut *tables;

        let before = ad_accounts.len();
        ad_accounts.retain(|_, a| a.user_id != user_id);
        let removed = (before - ad_accounts.len()) as u64;

        campaigns.retain(|_, c| ad_accounts.contains_key(&c.account_id));
        daily_metrics.retain(|(campaign_id, _), _| campaigns.contains_key(campaign_id));

        Ok(removed)
    }

    async fn log_error(&self, message: &str) -> Result<(), DatabaseError> {
        self.tables.write().await.error_logs.push(ErrorLogEntry {
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignStatus;
    use pretty_assertions::assert_eq;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn metric(campaign_id: &str, date: &str, spend: f64) -> DailyMetric {
        DailyMetric {
            campaign_id: campaign_id.to_string(),
            date: day(date),
            spend,
            impressions: 100,
            clicks: 5,
            ctr: 5.0,
            cpc: spend / 5.0,
            conversions: 2,
            conv_price: spend / 2.0,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_user(UserSettings::new("u1")).await;
        store.upsert_ad_account("u1", "act_1", "Main").await.unwrap();
        store
            .upsert_campaign(
                "act_1",
                &CampaignUpsert {
                    id: "c1".to_string(),
                    name: "Spring".to_string(),
                    status: CampaignStatus::Active,
                    created_at: None,
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn metric_upsert_is_idempotent_per_day() {
        let store = seeded().await;
        let row = metric("c1", "2024-05-09", 40.0);

        store.upsert_daily_metric(&row).await.unwrap();
        let once = store.daily_metrics("c1", DateRange::all()).await.unwrap();
        store.upsert_daily_metric(&row).await.unwrap();
        let twice = store.daily_metrics("c1", DateRange::all()).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.metric_count().await, 1);
    }

    #[tokio::test]
    async fn metric_upsert_replaces_the_whole_row() {
        let store = seeded().await;
        store
            .upsert_daily_metric(&metric("c1", "2024-05-09", 40.0))
            .await
            .unwrap();
        let replacement = metric("c1", "2024-05-09", 12.0);
        store.upsert_daily_metric(&replacement).await.unwrap();

        let rows = store.daily_metrics("c1", DateRange::all()).await.unwrap();
        assert_eq!(rows, vec![replacement]);
    }

    #[tokio::test]
    async fn upserts_refuse_missing_parents() {
        let store = seeded().await;

        let err = store.upsert_ad_account("ghost", "act_9", "X").await.unwrap_err();
        assert!(matches!(err, DatabaseError::MissingParent { entity: "user", .. }));

        let err = store
            .upsert_daily_metric(&metric("c404", "2024-05-09", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::MissingParent { entity: "campaign", .. }));
    }

    #[tokio::test]
    async fn account_upsert_only_renames() {
        let store = seeded().await;
        store.insert_user(UserSettings::new("u2")).await;
        store.upsert_ad_account("u2", "act_1", "Renamed").await.unwrap();

        let account = store.ad_account("act_1").await.unwrap().unwrap();
        assert_eq!(account.name, "Renamed");
        assert_eq!(account.user_id, "u1");
    }

    #[tokio::test]
    async fn metrics_are_filtered_and_ordered_by_date() {
        let store = seeded().await;
        for date in ["2024-05-03", "2024-05-01", "2024-05-02", "2024-05-05"] {
            store.upsert_daily_metric(&metric("c1", date, 1.0)).await.unwrap();
        }

        let rows = store
            .daily_metrics("c1", DateRange::between(day("2024-05-01"), day("2024-05-03")))
            .await
            .unwrap();
        let dates: Vec<_> = rows.iter().map(|m| m.date).collect();
        assert_eq!(dates, vec![day("2024-05-01"), day("2024-05-02"), day("2024-05-03")]);
    }

    #[tokio::test]
    async fn deleting_accounts_cascades() {
        let store = seeded().await;
        store
            .upsert_daily_metric(&metric("c1", "2024-05-09", 40.0))
            .await
            .unwrap();

        assert_eq!(store.delete_ad_accounts("u1").await.unwrap(), 1);
        assert!(store.campaign("c1").await.unwrap().is_none());
        assert_eq!(store.metric_count().await, 0);
        assert!(store.user("u1").await.unwrap().is_some());
    }
}
