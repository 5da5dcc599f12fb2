use crate::meta::{GraphTransport, MetaApi, MetaApiError, RawAdAccount, RawCampaign, ReqwestTransport};
use crate::models::{system_clock, Clock, InsightWindow, WindowError};
use crate::normalize::{normalize_campaign, normalize_insight};
use crate::store::{DatabaseError, Store};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),
    #[error("Unknown ad account: {0}")]
    UnknownAdAccount(String),
    #[error("Unknown campaign: {0}")]
    UnknownCampaign(String),
    #[error(transparent)]
    InvalidWindow(#[from] WindowError),
    #[error(transparent)]
    Api(#[from] MetaApiError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncCount {
    pub count: usize,
}

/// Outcome of one stage's independent units of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTally {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub accounts: usize,
    pub campaigns: StageTally,
    pub insights: StageTally,
    pub metric_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub users: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncProgress {
    AccountsSynced { count: usize },
    CampaignsSynced(StageTally),
    InsightsSynced(StageTally),
    /// Aggregates are recomputed on read, so nothing is actually cached.
    CacheInvalidated,
}

/// Drives accounts -> campaigns -> insights for a user, one unit at a time.
///
/// A failing account or campaign is written to the error log and skipped;
/// its siblings still sync. Operations on a single named entity propagate
/// their error instead.
pub struct SyncOrchestrator<S, T = ReqwestTransport> {
    store: Arc<S>,
    api: Arc<MetaApi<T>>,
    clock: Clock,
    progress: Option<mpsc::UnboundedSender<SyncProgress>>,
}

impl<S: Store, T: GraphTransport> SyncOrchestrator<S, T> {
    pub fn new(store: Arc<S>, api: Arc<MetaApi<T>>) -> Self {
        Self {
            store,
            api,
            clock: system_clock(),
            progress: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Stage completions are sent here; a dropped receiver does not stop the sync.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<SyncProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, event: SyncProgress) {
        if let Some(progress) = &self.progress {
            let _ = progress.send(event);
        }
    }

    pub async fn sync_ad_accounts(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<SyncCount, SyncError> {
        if self.store.user(user_id).await?.is_none() {
            return Err(SyncError::UnknownUser(user_id.to_string()));
        }

        let accounts: Vec<RawAdAccount> = self.api.ad_accounts(access_token).await?;
        for account in &accounts {
            self.store
                .upsert_ad_account(user_id, &account.id, &account.name)
                .await?;
        }

        info!(user_id, count = accounts.len(), "ad accounts synced");
        Ok(SyncCount {
            count: accounts.len(),
        })
    }

    pub async fn sync_campaigns(
        &self,
        ad_account_id: &str,
        access_token: &str,
    ) -> Result<SyncCount, SyncError> {
        if self.store.ad_account(ad_account_id).await?.is_none() {
            return Err(SyncError::UnknownAdAccount(ad_account_id.to_string()));
        }

        let campaigns: Vec<RawCampaign> = self.api.campaigns(ad_account_id, access_token).await?;
        for campaign in &campaigns {
            self.store
                .upsert_campaign(ad_account_id, &normalize_campaign(campaign))
                .await?;
        }

        info!(ad_account_id, count = campaigns.len(), "campaigns synced");
        Ok(SyncCount {
            count: campaigns.len(),
        })
    }

    pub async fn sync_campaign_insights(
        &self,
        campaign_id: &str,
        access_token: &str,
        window: InsightWindow,
    ) -> Result<SyncCount, SyncError> {
        let window = window.validate()?;
        if self.store.campaign(campaign_id).await?.is_none() {
            return Err(SyncError::UnknownCampaign(campaign_id.to_string()));
        }

        let today = (self.clock)().date_naive();
        let rows = self
            .api
            .campaign_insights(campaign_id, window, today, access_token)
            .await?;

        for raw in &rows {
            let metric = normalize_insight(campaign_id, raw, today);
            self.store.upsert_daily_metric(&metric).await?;
        }

        info!(campaign_id, count = rows.len(), ?window, "campaign insights synced");
        Ok(SyncCount { count: rows.len() })
    }

    /// Runs all three stages for one user. Only stage one can fail the call.
    pub async fn sync_user(
        &self,
        user_id: &str,
        access_token: &str,
        window: InsightWindow,
    ) -> Result<SyncReport, SyncError> {
        let window = window.validate()?;
        let mut report = SyncReport {
            accounts: self.sync_ad_accounts(user_id, access_token).await?.count,
            ..SyncReport::default()
        };
        self.emit(SyncProgress::AccountsSynced {
            count: report.accounts,
        });

        for account in self.store.ad_accounts(user_id).await? {
            match self.sync_campaigns(&account.id, access_token).await {
                Ok(_) => report.campaigns.succeeded += 1,
                Err(e) => {
                    report.campaigns.failed += 1;
                    self.record_failure(&format!("ad account {}", account.id), &e)
                        .await;
                }
            }
        }
        self.emit(SyncProgress::CampaignsSynced(report.campaigns));

        for campaign in self.store.campaigns(user_id).await? {
            match self
                .sync_campaign_insights(&campaign.id, access_token, window)
                .await
            {
                Ok(synced) => {
                    report.insights.succeeded += 1;
                    report.metric_rows += synced.count;
                }
                Err(e) => {
                    report.insights.failed += 1;
                    self.record_failure(&format!("campaign {}", campaign.id), &e)
                        .await;
                }
            }
        }
        self.emit(SyncProgress::InsightsSynced(report.insights));
        self.emit(SyncProgress::CacheInvalidated);

        info!(
            user_id,
            accounts = report.accounts,
            campaigns_ok = report.campaigns.succeeded,
            campaigns_failed = report.campaigns.failed,
            insights_ok = report.insights.succeeded,
            insights_failed = report.insights.failed,
            "user sync finished"
        );
        Ok(report)
    }

    /// Scheduled path: every user holding a live token, one after another.
    pub async fn sync_all_users(&self, window: InsightWindow) -> Result<RunSummary, SyncError> {
        let now = (self.clock)();
        let users = self.store.users_with_token().await?;
        let mut summary = RunSummary {
            users: users.len(),
            ..RunSummary::default()
        };

        for user in users {
            let Some(token) = user.meta_access_token.as_deref() else {
                continue;
            };
            if user.meta_token_expiry.is_some_and(|expiry| expiry <= now) {
                warn!(user_id = %user.id, "access token expired, skipping user");
                summary.skipped += 1;
                continue;
            }

            match self.sync_user(&user.id, token, window).await {
                Ok(_) => summary.synced += 1,
                Err(e) => {
                    summary.failed += 1;
                    self.record_failure(&format!("user {}", user.id), &e).await;
                }
            }
        }

        Ok(summary)
    }

    /// Incremental yesterday-only sync of all users every `interval`.
    pub async fn run(&self, interval: Duration) {
        loop {
            match self.sync_all_users(InsightWindow::Yesterday).await {
                Ok(summary) => info!(
                    users = summary.users,
                    synced = summary.synced,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scheduled sync finished"
                ),
                Err(e) => error!(error = %e, "scheduled sync aborted"),
            }

            time::sleep(interval).await;
        }
    }

    async fn record_failure(&self, unit: &str, err: &SyncError) {
        warn!(unit, error = %err, "sync unit failed, continuing");
        let message = format!("Sync failed for {}: {}", unit, err);
        if let Err(e) = self.store.log_error(&message).await {
            error!(unit, error = %e, "could not write error log entry");
        }
    }
}
