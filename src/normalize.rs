//! Turns raw insight rows into typed daily metrics.
//!
//! Unparsable numbers become 0 rather than failing the row: a malformed
//! field yields a zeroed but usable metric.

use crate::constants::CONVERSION_ACTION_TYPE;
use crate::meta::{RawAction, RawCampaign, RawInsight};
use crate::models::{CampaignStatus, DailyMetric};
use crate::store::CampaignUpsert;
use chrono::{DateTime, NaiveDate, Utc};

/// Normalizes one day of insights for `campaign_id`. `today` is used when
/// the row carries no `date_start`.
pub fn normalize_insight(campaign_id: &str, raw: &RawInsight, today: NaiveDate) -> DailyMetric {
    let spend = parse_amount(raw.spend.as_deref());
    let conversions = conversions(&raw.actions);

    DailyMetric {
        campaign_id: campaign_id.to_string(),
        date: raw
            .date_start
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .unwrap_or(today),
        spend,
        impressions: parse_count(raw.impressions.as_deref()),
        clicks: parse_count(raw.clicks.as_deref()),
        ctr: parse_amount(raw.ctr.as_deref()),
        cpc: parse_amount(raw.cpc.as_deref()),
        conversions,
        conv_price: conversion_price(spend, conversions),
    }
}

pub fn normalize_campaign(raw: &RawCampaign) -> CampaignUpsert {
    CampaignUpsert {
        id: raw.id.clone(),
        name: raw.name.clone(),
        status: CampaignStatus::from(raw.status.as_str()),
        created_at: raw.created_time.as_deref().and_then(parse_created_time),
    }
}

/// Platform timestamps look like `2024-01-05T10:00:00+0000`; RFC 3339 is
/// accepted too.
pub fn parse_created_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Value of the first pixel-conversion action, or 0.
pub fn conversions(actions: &[RawAction]) -> i64 {
    actions
        .iter()
        .find(|action| action.action_type.contains(CONVERSION_ACTION_TYPE))
        .map(|action| parse_count(action.value.as_deref()))
        .unwrap_or(0)
}

/// Spend per conversion rounded to cents; 0 without conversions.
pub fn conversion_price(spend: f64, conversions: i64) -> f64 {
    if conversions > 0 {
        round2(spend / conversions as f64)
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_amount(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

// Integers may come as "12" or "12.0"; fractions truncate, negatives clamp.
fn parse_count(raw: Option<&str>) -> i64 {
    let Some(s) = raw.map(str::trim) else {
        return 0;
    };
    let value = s
        .parse::<i64>()
        .ok()
        .or_else(|| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
        .unwrap_or(0);
    value.max(0)
}
