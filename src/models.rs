use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Source of "now"; injectable so date windows are reproducible.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserSettings {
    pub id: String,
    pub green_max: Option<f64>,
    pub yellow_max: Option<f64>,
    pub meta_access_token: Option<String>,
    pub meta_token_expiry: Option<DateTime<Utc>>,
}

impl UserSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            green_max: None,
            yellow_max: None,
            meta_access_token: None,
            meta_token_expiry: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdAccount {
    pub id: String,
    pub name: String,
    pub user_id: String,
}

/// Platform-side lifecycle status. Anything the platform reports beyond the
/// three well-known values is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
    Other(String),
}

impl CampaignStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CampaignStatus::Active => "ACTIVE",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Archived => "ARCHIVED",
            CampaignStatus::Other(s) => s,
        }
    }
}

impl From<&str> for CampaignStatus {
    fn from(s: &str) -> Self {
        match s {
            "ACTIVE" => CampaignStatus::Active,
            "PAUSED" => CampaignStatus::Paused,
            "ARCHIVED" => CampaignStatus::Archived,
            other => CampaignStatus::Other(other.to_string()),
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CampaignStatus::from(s))
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CampaignStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CampaignStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(CampaignStatus::from(raw.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub account_id: String,
    pub green_max: Option<f64>,
    pub yellow_max: Option<f64>,
}

/// One campaign's performance on one calendar day. `(campaign_id, date)` is
/// the natural key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailyMetric {
    pub campaign_id: String,
    pub date: NaiveDate,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    /// Percent, already multiplied by 100.
    pub ctr: f64,
    pub cpc: f64,
    pub conversions: i64,
    pub conv_price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorLogEntry {
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Inclusive date bounds; an open side is unbounded, both open means "all".
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Which days an insight sync asks the platform for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum InsightWindow {
    Lifetime,
    Range { since: NaiveDate, until: NaiveDate },
    Yesterday,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Date range needs both since and until")]
    Incomplete,
    #[error("Date range starts after it ends: {since} > {until}")]
    Inverted { since: NaiveDate, until: NaiveDate },
}

impl InsightWindow {
    /// Resolves caller options in priority order: lifetime flag, explicit
    /// pair, otherwise yesterday only.
    pub fn resolve(
        lifetime: bool,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Self, WindowError> {
        match (lifetime, since, until) {
            (true, _, _) => Ok(InsightWindow::Lifetime),
            (false, Some(since), Some(until)) => InsightWindow::Range { since, until }.validate(),
            (false, None, None) => Ok(InsightWindow::Yesterday),
            _ => Err(WindowError::Incomplete),
        }
    }

    pub fn validate(self) -> Result<Self, WindowError> {
        match self {
            InsightWindow::Range { since, until } if since > until => {
                Err(WindowError::Inverted { since, until })
            }
            window => Ok(window),
        }
    }
}
