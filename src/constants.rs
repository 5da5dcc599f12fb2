// API Versions
pub const META_API_VERSION: &str = "v21.0";

// API Base URLs
pub const META_BASE_URL: &str = "https://graph.facebook.com";

// Worker Settings
pub const SYNC_INTERVAL_SECS: u64 = 86_400; // once a day

// Meta API Fields
pub const META_ACCOUNT_FIELDS: &str = "id,name";
pub const META_CAMPAIGN_FIELDS: &str = "id,name,status,created_time";
pub const META_INSIGHT_FIELDS: &str = "impressions,clicks,spend,ctr,cpc,actions,date_start,date_stop";

// Preset covering the whole history the platform keeps
pub const META_LIFETIME_PRESET: &str = "maximum";

// Action type counted as a conversion (matched by substring)
pub const CONVERSION_ACTION_TYPE: &str = "offsite_conversion.fb_pixel_custom";

// Threshold fallbacks when neither campaign nor user sets one
pub const DEFAULT_GREEN_MAX: f64 = 0.5;
pub const DEFAULT_YELLOW_MAX: f64 = 0.59;

// Aggregation windows, in days including today
pub const RECENT_WINDOW_DAYS: i64 = 3;
pub const CHART_WINDOW_DAYS: i64 = 14;

// Token expiry is surfaced this many days ahead
pub const TOKEN_EXPIRY_WARNING_DAYS: i64 = 10;
