//! Aggregation over the daily metric time series and traffic-light
//! classification.
//!
//! Averages are plain arithmetic means over rows, not weighted by spend or
//! volume.

use crate::constants::{DEFAULT_GREEN_MAX, DEFAULT_YELLOW_MAX};
use crate::models::{Campaign, DailyMetric, DateRange, UserSettings};
use crate::normalize::round2;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PerformanceStatus {
    /// Not enough data to judge.
    Gray,
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub green_max: f64,
    pub yellow_max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            green_max: DEFAULT_GREEN_MAX,
            yellow_max: DEFAULT_YELLOW_MAX,
        }
    }
}

impl Thresholds {
    /// Campaign override, then user default, then the built-in fallback;
    /// each bound resolves on its own.
    pub fn resolve(campaign: &Campaign, user: Option<&UserSettings>) -> Self {
        Self::from_layers(
            campaign.green_max,
            campaign.yellow_max,
            user.and_then(|u| u.green_max),
            user.and_then(|u| u.yellow_max),
        )
    }

    pub fn from_layers(
        campaign_green: Option<f64>,
        campaign_yellow: Option<f64>,
        user_green: Option<f64>,
        user_yellow: Option<f64>,
    ) -> Self {
        Self {
            green_max: campaign_green.or(user_green).unwrap_or(DEFAULT_GREEN_MAX),
            yellow_max: campaign_yellow.or(user_yellow).unwrap_or(DEFAULT_YELLOW_MAX),
        }
    }

    /// `< green_max` is green, up to and including `yellow_max` is yellow.
    pub fn classify(&self, avg_conv_price: Option<f64>) -> PerformanceStatus {
        match avg_conv_price {
            None => PerformanceStatus::Gray,
            Some(price) if price < self.green_max => PerformanceStatus::Green,
            Some(price) if price <= self.yellow_max => PerformanceStatus::Yellow,
            Some(_) => PerformanceStatus::Red,
        }
    }

    /// List-view variant: a zero recent average also means no data.
    pub fn classify_recent(&self, avg_conv_price: Option<f64>) -> PerformanceStatus {
        self.classify(avg_conv_price.filter(|price| *price > 0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub conv_price: f64,
    pub cpc: f64,
    pub ctr: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub clicks: i64,
    pub impressions: i64,
    pub spend: f64,
    pub conversions: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub conv_price: f64,
}

pub fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Averages over all rows, or `None` when there are none.
pub fn averages(metrics: &[DailyMetric]) -> Option<Averages> {
    Some(Averages {
        conv_price: mean(metrics.iter().map(|m| m.conv_price))?,
        cpc: mean(metrics.iter().map(|m| m.cpc))?,
        ctr: mean(metrics.iter().map(|m| m.ctr))?,
    })
}

pub fn totals(metrics: &[DailyMetric]) -> Totals {
    metrics.iter().fold(Totals::default(), |acc, m| Totals {
        clicks: acc.clicks.saturating_add(m.clicks),
        impressions: acc.impressions.saturating_add(m.impressions),
        spend: acc.spend + m.spend,
        conversions: acc.conversions.saturating_add(m.conversions),
    })
}

pub fn rounded_totals(metrics: &[DailyMetric]) -> Totals {
    let totals = totals(metrics);
    Totals {
        spend: round2(totals.spend),
        ..totals
    }
}

/// One point per calendar day, the mean of that day's conversion prices,
/// ascending by date.
pub fn bucket_by_date<'a, I>(metrics: I) -> Vec<ChartPoint>
where
    I: IntoIterator<Item = &'a DailyMetric>,
{
    let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for metric in metrics {
        let bucket = buckets.entry(metric.date).or_insert((0.0, 0));
        bucket.0 += metric.conv_price;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(date, (sum, count))| ChartPoint {
            date,
            conv_price: sum / count as f64,
        })
        .collect()
}

/// Lays `points` onto every day of `from..=to`, zero where a day is missing.
/// Points outside the window are dropped.
pub fn fill_window(points: &[ChartPoint], from: NaiveDate, to: NaiveDate) -> Vec<ChartPoint> {
    let by_date: BTreeMap<NaiveDate, f64> = points.iter().map(|p| (p.date, p.conv_price)).collect();

    from.iter_days()
        .take_while(|date| *date <= to)
        .map(|date| ChartPoint {
            date,
            conv_price: by_date.get(&date).copied().unwrap_or(0.0),
        })
        .collect()
}

/// The last `days` calendar days, today included.
pub fn trailing_window(today: NaiveDate, days: i64) -> DateRange {
    DateRange::between(today - Duration::days(days - 1), today)
}
