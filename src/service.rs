use crate::config::Config;
use crate::constants::{CHART_WINDOW_DAYS, RECENT_WINDOW_DAYS, TOKEN_EXPIRY_WARNING_DAYS};
use crate::meta::{GraphTransport, MetaApi, MetaApiError, OAuthClient, ReqwestTransport};
use crate::models::{
    system_clock, Campaign, CampaignStatus, Clock, DateRange, UserSettings,
};
use crate::normalize::round2;
use crate::stats::{
    averages, bucket_by_date, fill_window, mean, rounded_totals, totals, trailing_window,
    ChartPoint, PerformanceStatus, Thresholds, Totals,
};
use crate::store::{DatabaseError, Store};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] MetaApiError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub active_campaigns: usize,
    pub warning_campaigns: usize,
    pub critical_campaigns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CampaignStats {
    pub conv_price: f64,
    pub cpc: f64,
    pub ctr: f64,
    pub performance: PerformanceStatus,
}

// Figures cover the campaign's whole history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignRow {
    pub id: String,
    pub account_id: String,
    pub account_name: String,
    pub name: String,
    pub status: CampaignStatus,
    pub conv_price: Option<f64>,
    pub cpc: Option<f64>,
    pub ctr: Option<f64>,
    pub totals: Option<Totals>,
    pub performance: PerformanceStatus,
    pub green_max: Option<f64>,
    pub yellow_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenExpiry {
    pub expires_at: DateTime<Utc>,
    pub days_left: i64,
    pub expiring_soon: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdScope {
    User { user_id: String },
    Campaign { user_id: String, campaign_id: String },
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client: OAuthClient,
    pub redirect_uri: String,
}

impl OAuthSettings {
    /// `None` unless client id, secret and app URL are all configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let app_url = config.app_url.as_deref()?;
        Some(Self {
            client: OAuthClient {
                client_id: config.facebook_client_id.clone()?,
                client_secret: config.facebook_client_secret.clone()?,
            },
            redirect_uri: format!("{}/dashboard/meta/callback", app_url.trim_end_matches('/')),
        })
    }
}

pub struct DashboardService<S, T = ReqwestTransport> {
    store: Arc<S>,
    api: Arc<MetaApi<T>>,
    oauth: Option<OAuthSettings>,
    clock: Clock,
}

impl<S: Store, T: GraphTransport> DashboardService<S, T> {
    pub fn new(store: Arc<S>, api: Arc<MetaApi<T>>) -> Self {
        Self {
            store,
            api,
            oauth: None,
            clock: system_clock(),
        }
    }

    pub fn with_oauth(mut self, oauth: OAuthSettings) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    async fn user(&self, user_id: &str) -> Result<UserSettings, ServiceError> {
        self.store
            .user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    async fn owned_campaign(
        &self,
        user_id: &str,
        campaign_id: &str,
    ) -> Result<Campaign, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("campaign {}", campaign_id));
        let campaign = self.store.campaign(campaign_id).await?.ok_or_else(not_found)?;
        match self.store.ad_account(&campaign.account_id).await? {
            Some(account) if account.user_id == user_id => Ok(campaign),
            _ => Err(not_found()),
        }
    }

    /// Counts over ACTIVE campaigns, judged on the trailing three days.
    pub async fn dashboard_stats(&self, user_id: &str) -> Result<DashboardStats, ServiceError> {
        let user = self.user(user_id).await?;
        let recent = trailing_window(self.today(), RECENT_WINDOW_DAYS);

        let mut stats = DashboardStats {
            active_campaigns: 0,
            warning_campaigns: 0,
            critical_campaigns: 0,
        };

        for campaign in self.store.campaigns(user_id).await? {
            if campaign.status != CampaignStatus::Active {
                continue;
            }
            stats.active_campaigns += 1;

            let metrics = self.store.daily_metrics(&campaign.id, recent).await?;
            let avg = mean(metrics.iter().map(|m| m.conv_price));
            match Thresholds::resolve(&campaign, Some(&user)).classify(avg) {
                PerformanceStatus::Yellow => stats.warning_campaigns += 1,
                PerformanceStatus::Red => stats.critical_campaigns += 1,
                PerformanceStatus::Green | PerformanceStatus::Gray => {}
            }
        }

        Ok(stats)
    }

    pub async fn campaign_stats(
        &self,
        user_id: &str,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<CampaignStats, ServiceError> {
        let campaign = self.owned_campaign(user_id, campaign_id).await?;
        let user = self.store.user(user_id).await?;
        let metrics = self.store.daily_metrics(campaign_id, range).await?;

        let thresholds = Thresholds::resolve(&campaign, user.as_ref());
        Ok(match averages(&metrics) {
            Some(avg) => CampaignStats {
                conv_price: round2(avg.conv_price),
                cpc: round2(avg.cpc),
                ctr: round2(avg.ctr),
                performance: thresholds.classify(Some(avg.conv_price)),
            },
            None => CampaignStats {
                conv_price: 0.0,
                cpc: 0.0,
                ctr: 0.0,
                performance: PerformanceStatus::Gray,
            },
        })
    }

    pub async fn campaign_totals(
        &self,
        user_id: &str,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<Totals, ServiceError> {
        self.owned_campaign(user_id, campaign_id).await?;
        let metrics = self.store.daily_metrics(campaign_id, range).await?;
        Ok(rounded_totals(&metrics))
    }

    // days without data are absent
    pub async fn campaign_chart_series(
        &self,
        user_id: &str,
        campaign_id: &str,
        range: DateRange,
    ) -> Result<Vec<ChartPoint>, ServiceError> {
        self.owned_campaign(user_id, campaign_id).await?;
        let metrics = self.store.daily_metrics(campaign_id, range).await?;
        Ok(bucket_by_date(&metrics))
    }

    /// Fourteen daily points averaged across the user's ACTIVE campaigns,
    /// zero on days without data.
    pub async fn dashboard_chart(&self, user_id: &str) -> Result<Vec<ChartPoint>, ServiceError> {
        self.user(user_id).await?;
        let window = trailing_window(self.today(), CHART_WINDOW_DAYS);

        let mut metrics = Vec::new();
        for campaign in self.store.campaigns(user_id).await? {
            if campaign.status == CampaignStatus::Active {
                metrics.extend(self.store.daily_metrics(&campaign.id, window).await?);
            }
        }

        Ok(fill_window(&bucket_by_date(&metrics), window_start(window), self.today()))
    }

    pub async fn campaign_sparkline(
        &self,
        user_id: &str,
        campaign_id: &str,
    ) -> Result<Vec<ChartPoint>, ServiceError> {
        self.owned_campaign(user_id, campaign_id).await?;
        let window = trailing_window(self.today(), CHART_WINDOW_DAYS);
        let metrics = self.store.daily_metrics(campaign_id, window).await?;
        Ok(fill_window(&bucket_by_date(&metrics), window_start(window), self.today()))
    }

    /// Campaign table rows, newest campaign first.
    ///
    /// The dashboard-wide table colors each row by its trailing three days
    /// and shows GRAY for a zero average. Scoped to one account, rows are
    /// colored by their all-time average like the figures beside them.
    pub async fn campaign_overview(
        &self,
        user_id: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<CampaignRow>, ServiceError> {
        let user = self.user(user_id).await?;
        let account_names: HashMap<String, String> = self
            .store
            .ad_accounts(user_id)
            .await?
            .into_iter()
            .map(|a| (a.id, a.name))
            .collect();
        if let Some(id) = account_id {
            if !account_names.contains_key(id) {
                return Err(ServiceError::NotFound(format!("ad account {}", id)));
            }
        }
        let recent = trailing_window(self.today(), RECENT_WINDOW_DAYS);

        let mut rows = Vec::new();
        for campaign in self.store.campaigns(user_id).await? {
            if account_id.is_some_and(|id| id != campaign.account_id) {
                continue;
            }

            let metrics = self.store.daily_metrics(&campaign.id, DateRange::all()).await?;
            let avg = averages(&metrics);
            let thresholds = Thresholds::resolve(&campaign, Some(&user));
            let performance = if account_id.is_some() {
                thresholds.classify(avg.map(|a| a.conv_price))
            } else {
                thresholds.classify_recent(mean(
                    metrics
                        .iter()
                        .filter(|m| recent.contains(m.date))
                        .map(|m| m.conv_price),
                ))
            };

            rows.push(CampaignRow {
                account_name: account_names
                    .get(&campaign.account_id)
                    .cloned()
                    .unwrap_or_default(),
                conv_price: avg.map(|a| a.conv_price),
                cpc: avg.map(|a| a.cpc),
                ctr: avg.map(|a| a.ctr),
                totals: (!metrics.is_empty()).then(|| totals(&metrics)),
                performance,
                id: campaign.id,
                account_id: campaign.account_id,
                name: campaign.name,
                status: campaign.status,
                green_max: campaign.green_max,
                yellow_max: campaign.yellow_max,
            });
        }

        Ok(rows)
    }

    pub async fn update_thresholds(
        &self,
        scope: ThresholdScope,
        green_max: Option<f64>,
        yellow_max: Option<f64>,
    ) -> Result<(), ServiceError> {
        validate_thresholds(green_max, yellow_max)?;

        match scope {
            ThresholdScope::User { user_id } => {
                if !self
                    .store
                    .set_user_thresholds(&user_id, green_max, yellow_max)
                    .await?
                {
                    return Err(ServiceError::NotFound(format!("user {}", user_id)));
                }
                info!(user_id, ?green_max, ?yellow_max, "user thresholds updated");
            }
            ThresholdScope::Campaign {
                user_id,
                campaign_id,
            } => {
                self.owned_campaign(&user_id, &campaign_id).await?;
                self.store
                    .set_campaign_thresholds(&campaign_id, green_max, yellow_max)
                    .await?;
                info!(campaign_id, ?green_max, ?yellow_max, "campaign thresholds updated");
            }
        }

        Ok(())
    }

    /// Completes the OAuth flow: code, then short-lived token, then a
    /// long-lived token whose expiry is stored with it.
    pub async fn connect_meta(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        let oauth = self
            .oauth
            .as_ref()
            .ok_or_else(|| ServiceError::Validation("OAuth client is not configured".to_string()))?;
        if code.trim().is_empty() {
            return Err(ServiceError::Validation("authorization code is empty".to_string()));
        }
        self.user(user_id).await?;

        let short = self
            .api
            .exchange_code(&oauth.client, code, &oauth.redirect_uri)
            .await?;
        let long = self
            .api
            .exchange_long_lived(&oauth.client, &short.access_token)
            .await?;

        let expiry = long
            .expires_in
            .map(|secs| expiry_after((self.clock)(), secs))
            .transpose()?;
        self.store
            .set_access_token(user_id, Some(&long.access_token), expiry)
            .await?;

        info!(user_id, ?expiry, "meta account connected");
        Ok(expiry)
    }

    pub async fn token_expiry(&self, user_id: &str) -> Result<Option<TokenExpiry>, ServiceError> {
        let user = self.user(user_id).await?;
        let now = (self.clock)();

        Ok(user.meta_token_expiry.map(|expires_at| {
            let days_left = days_until(now, expires_at);
            TokenExpiry {
                expires_at,
                days_left,
                expiring_soon: days_left <= TOKEN_EXPIRY_WARNING_DAYS,
            }
        }))
    }

    pub async fn disconnect_meta(&self, user_id: &str) -> Result<(), ServiceError> {
        if !self.store.set_access_token(user_id, None, None).await? {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }
        info!(user_id, "meta account disconnected");
        Ok(())
    }

    pub async fn reset_data(&self, user_id: &str) -> Result<u64, ServiceError> {
        self.user(user_id).await?;
        let removed = self.store.delete_ad_accounts(user_id).await?;
        info!(user_id, removed, "user data reset");
        Ok(removed)
    }
}

fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, MetaApiError> {
    if expires_in <= 0 {
        return Err(MetaApiError::InvalidResponse(format!(
            "token expires_in must be positive, got {}",
            expires_in
        )));
    }
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            MetaApiError::InvalidResponse(format!("token expires_in out of range: {}", expires_in))
        })
}

fn window_start(window: DateRange) -> NaiveDate {
    // trailing_window always sets both bounds
    window.from.unwrap_or(NaiveDate::MIN)
}

// whole days, rounded up, never negative
fn days_until(now: DateTime<Utc>, expiry: DateTime<Utc>) -> i64 {
    let secs = (expiry - now).num_seconds().max(0);
    (secs + 86_399) / 86_400
}

fn validate_thresholds(green_max: Option<f64>, yellow_max: Option<f64>) -> Result<(), ServiceError> {
    for (name, value) in [("greenMax", green_max), ("yellowMax", yellow_max)] {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(ServiceError::Validation(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
    }
    if let (Some(green), Some(yellow)) = (green_max, yellow_max) {
        if green > yellow {
            return Err(ServiceError::Validation(format!(
                "greenMax ({}) must not exceed yellowMax ({})",
                green, yellow
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::meta::testing::ScriptedTransport;
    use crate::models::DailyMetric;
    use crate::store::CampaignUpsert;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BASE: &str = "https://graph.test/v21.0";

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).unwrap()
    }

    fn metric(campaign_id: &str, date: &str, conv_price: f64) -> DailyMetric {
        DailyMetric {
            campaign_id: campaign_id.to_string(),
            date: day(date),
            spend: 10.0,
            impressions: 500,
            clicks: 10,
            ctr: 2.0,
            cpc: 1.0,
            conversions: 2,
            conv_price,
        }
    }

    async fn add_campaign(store: &MemoryStore, id: &str, status: CampaignStatus, created: u32) {
        store
            .upsert_campaign(
                "act_1",
                &CampaignUpsert {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    status,
                    created_at: Some(Utc.with_ymd_and_hms(2024, 1, created, 0, 0, 0).unwrap()),
                },
            )
            .await
            .unwrap();
    }

    async fn service_with(
        transport: ScriptedTransport,
    ) -> (Arc<MemoryStore>, DashboardService<MemoryStore, ScriptedTransport>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(UserSettings::new("u1")).await;
        store.insert_user(UserSettings::new("u2")).await;
        store.upsert_ad_account("u1", "act_1", "Main").await.unwrap();

        let api = Arc::new(MetaApi::with_transport(transport, BASE));
        let service = DashboardService::new(store.clone(), api).with_clock(Arc::new(now));
        (store, service)
    }

    async fn service() -> (Arc<MemoryStore>, DashboardService<MemoryStore, ScriptedTransport>) {
        service_with(ScriptedTransport::new()).await
    }

    #[tokio::test]
    async fn dashboard_stats_count_active_campaigns_by_recent_status() {
        let (store, service) = service().await;
        add_campaign(&store, "green", CampaignStatus::Active, 1).await;
        add_campaign(&store, "yellow", CampaignStatus::Active, 2).await;
        add_campaign(&store, "red", CampaignStatus::Active, 3).await;
        add_campaign(&store, "empty", CampaignStatus::Active, 4).await;
        add_campaign(&store, "paused", CampaignStatus::Paused, 5).await;

        for m in [
            metric("green", "2024-05-13", 0.2),
            // outside the trailing window, must not drag the average up
            metric("green", "2024-05-01", 9.0),
            metric("yellow", "2024-05-12", 0.5),
            metric("yellow", "2024-05-13", 0.6),
            metric("red", "2024-05-14", 0.8),
            metric("paused", "2024-05-14", 5.0),
        ] {
            store.upsert_daily_metric(&m).await.unwrap();
        }

        let stats = service.dashboard_stats("u1").await.unwrap();
        assert_eq!(
            stats,
            DashboardStats {
                active_campaigns: 4,
                warning_campaigns: 1,
                critical_campaigns: 1,
            }
        );
    }

    #[tokio::test]
    async fn campaign_stats_use_the_requested_range_and_resolved_thresholds() {
        let (store, service) = service().await;
        add_campaign(&store, "c1", CampaignStatus::Active, 1).await;
        store
            .set_user_thresholds("u1", Some(1.0), Some(2.0))
            .await
            .unwrap();
        for m in [
            metric("c1", "2024-05-08", 1.0),
            metric("c1", "2024-05-09", 2.0),
            metric("c1", "2024-05-10", 0.005),
        ] {
            store.upsert_daily_metric(&m).await.unwrap();
        }

        let stats = service
            .campaign_stats("u1", "c1", DateRange::between(day("2024-05-08"), day("2024-05-09")))
            .await
            .unwrap();
        assert_eq!(
            stats,
            CampaignStats {
                conv_price: 1.5,
                cpc: 1.0,
                ctr: 2.0,
                performance: PerformanceStatus::Yellow,
            }
        );

        let all = service
            .campaign_stats("u1", "c1", DateRange::all())
            .await
            .unwrap();
        assert_eq!(all.conv_price, 1.0);
        assert_eq!(all.performance, PerformanceStatus::Yellow);

        let empty = service
            .campaign_stats("u1", "c1", DateRange::since(day("2024-06-01")))
            .await
            .unwrap();
        assert_eq!(empty.performance, PerformanceStatus::Gray);
    }

    #[tokio::test]
    async fn other_users_campaigns_are_not_found() {
        let (store, service) = service().await;
        add_campaign(&store, "c1", CampaignStatus::Active, 1).await;

        let err = service
            .campaign_stats("u2", "c1", DateRange::all())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = service.campaign_sparkline("u1", "nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn chart_series_averages_same_day_rows() {
        let (store, service) = service().await;
        add_campaign(&store, "c1", CampaignStatus::Active, 1).await;
        add_campaign(&store, "c2", CampaignStatus::Active, 2).await;
        for m in [
            metric("c1", "2024-05-13", 10.0),
            metric("c2", "2024-05-13", 20.0),
            metric("c1", "2024-05-12", 4.0),
        ] {
            store.upsert_daily_metric(&m).await.unwrap();
        }

        let chart = service.dashboard_chart("u1").await.unwrap();
        assert_eq!(chart.len(), 14);
        assert_eq!(chart[0].date, day("2024-05-01"));
        assert_eq!(chart[13].date, day("2024-05-14"));
        assert_eq!(chart[12].conv_price, 15.0);
        assert_eq!(chart[11].conv_price, 4.0);
        assert_eq!(chart[13].conv_price, 0.0);

        let series = service
            .campaign_chart_series("u1", "c1", DateRange::all())
            .await
            .unwrap();
        let dates: Vec<_> = series.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day("2024-05-12"), day("2024-05-13")]);

        let sparkline = service.campaign_sparkline("u1", "c2").await.unwrap();
        assert_eq!(sparkline.len(), 14);
        assert_eq!(sparkline[12].conv_price, 20.0);
    }

    #[tokio::test]
    async fn overview_totals_and_status_use_different_windows() {
        let (store, service) = service().await;
        add_campaign(&store, "old", CampaignStatus::Active, 1).await;
        add_campaign(&store, "new", CampaignStatus::Paused, 9).await;
        add_campaign(&store, "idle", CampaignStatus::Active, 5).await;
        for m in [
            metric("old", "2024-04-01", 9.0),
            metric("old", "2024-05-13", 0.1),
            metric("idle", "2024-05-13", 0.0),
        ] {
            store.upsert_daily_metric(&m).await.unwrap();
        }

        let rows = service.campaign_overview("u1", None).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "idle", "old"]);

        let old = &rows[2];
        assert_eq!(old.conv_price, Some(4.55));
        assert_eq!(old.performance, PerformanceStatus::Green);
        assert_eq!(old.totals.map(|t| t.clicks), Some(20));
        assert_eq!(old.account_name, "Main");

        assert_eq!(rows[1].performance, PerformanceStatus::Gray);
        assert_eq!(rows[0].totals, None);
        assert_eq!(rows[0].performance, PerformanceStatus::Gray);

        let err = service
            .campaign_overview("u1", Some("act_other"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn account_table_colors_rows_by_all_time_average() {
        let (store, service) = service().await;
        add_campaign(&store, "old", CampaignStatus::Active, 1).await;
        add_campaign(&store, "idle", CampaignStatus::Active, 5).await;
        for m in [
            metric("old", "2024-04-01", 9.0),
            metric("old", "2024-05-13", 0.1),
            metric("idle", "2024-05-13", 0.0),
        ] {
            store.upsert_daily_metric(&m).await.unwrap();
        }

        let rows = service.campaign_overview("u1", Some("act_1")).await.unwrap();
        let statuses: Vec<_> = rows.iter().map(|r| (r.id.as_str(), r.performance)).collect();
        assert_eq!(
            statuses,
            vec![
                ("idle", PerformanceStatus::Green),
                ("old", PerformanceStatus::Red),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_users_are_not_found() {
        let (_store, service) = service().await;

        assert!(matches!(
            service.dashboard_stats("ghost").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.dashboard_chart("ghost").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.campaign_overview("ghost", None).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.reset_data("ghost").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn thresholds_are_validated_and_scoped() {
        let (store, service) = service().await;
        add_campaign(&store, "c1", CampaignStatus::Active, 1).await;

        let err = service
            .update_thresholds(
                ThresholdScope::User {
                    user_id: "u1".to_string(),
                },
                Some(0.8),
                Some(0.4),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = service
            .update_thresholds(
                ThresholdScope::Campaign {
                    user_id: "u2".to_string(),
                    campaign_id: "c1".to_string(),
                },
                Some(0.3),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        service
            .update_thresholds(
                ThresholdScope::Campaign {
                    user_id: "u1".to_string(),
                    campaign_id: "c1".to_string(),
                },
                Some(0.3),
                None,
            )
            .await
            .unwrap();
        let campaign = store.campaign("c1").await.unwrap().unwrap();
        assert_eq!(campaign.green_max, Some(0.3));
        assert_eq!(campaign.yellow_max, None);
    }

    #[tokio::test]
    async fn connecting_stores_long_lived_token_and_expiry() {
        let transport = ScriptedTransport::new().route(
            &format!("{BASE}/oauth/access_token"),
            200,
            json!({"access_token": "long-lived", "expires_in": 864000}),
        );
        let (store, service) = service_with(transport).await;

        let err = service.connect_meta("u1", "code").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let service = service.with_oauth(oauth());
        let expiry = service.connect_meta("u1", "code").await.unwrap();
        assert_eq!(expiry, Some(now() + Duration::days(10)));

        let user = store.user("u1").await.unwrap().unwrap();
        assert_eq!(user.meta_access_token.as_deref(), Some("long-lived"));

        let status = service.token_expiry("u1").await.unwrap().unwrap();
        assert_eq!(status.days_left, 10);
        assert!(status.expiring_soon);

        service.disconnect_meta("u1").await.unwrap();
        assert!(service.token_expiry("u1").await.unwrap().is_none());
    }

    #[test]
    fn oauth_settings_need_the_full_client_config() {
        let mut config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/db".to_string()),
            "APP_URL" => Some("https://dash.test/".to_string()),
            "FACEBOOK_CLIENT_ID" => Some("id".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(OAuthSettings::from_config(&config).is_none());

        config.facebook_client_secret = Some("secret".to_string());
        let oauth = OAuthSettings::from_config(&config).unwrap();
        assert_eq!(oauth.redirect_uri, "https://dash.test/dashboard/meta/callback");
    }

    fn oauth() -> OAuthSettings {
        OAuthSettings {
            client: OAuthClient {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            redirect_uri: "https://dash.test/dashboard/meta/callback".to_string(),
        }
    }

    #[tokio::test]
    async fn unusable_token_lifetimes_are_rejected() {
        for expires_in in [json!(9_000_000_000_000_000i64), json!(0), json!(-3600)] {
            let transport = ScriptedTransport::new().route(
                &format!("{BASE}/oauth/access_token"),
                200,
                json!({"access_token": "long-lived", "expires_in": expires_in}),
            );
            let (store, service) = service_with(transport).await;
            let service = service.with_oauth(oauth());

            let err = service.connect_meta("u1", "code").await.unwrap_err();
            assert!(
                matches!(err, ServiceError::Api(MetaApiError::InvalidResponse(_))),
                "expires_in {expires_in}: {err:?}"
            );
            let user = store.user("u1").await.unwrap().unwrap();
            assert_eq!(user.meta_access_token, None);
        }
    }

    #[test]
    fn days_until_rounds_up_and_floors_at_zero() {
        let now = now();
        assert_eq!(days_until(now, now + Duration::hours(1)), 1);
        assert_eq!(days_until(now, now + Duration::days(11)), 11);
        assert_eq!(days_until(now, now - Duration::days(2)), 0);
    }

    #[tokio::test]
    async fn reset_removes_everything_below_the_user() {
        let (store, service) = service().await;
        add_campaign(&store, "c1", CampaignStatus::Active, 1).await;
        store
            .upsert_daily_metric(&metric("c1", "2024-05-13", 1.0))
            .await
            .unwrap();

        assert_eq!(service.reset_data("u1").await.unwrap(), 1);
        assert!(service.campaign_overview("u1", None).await.unwrap().is_empty());
        assert_eq!(store.metric_count().await, 0);
    }
}
