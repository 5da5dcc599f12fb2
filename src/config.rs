use crate::constants::{META_API_VERSION, META_BASE_URL, SYNC_INTERVAL_SECS};
use dotenv::dotenv;
use std::env;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub meta_base_url: String,
    pub meta_api_version: String,
    pub facebook_client_id: Option<String>,
    pub facebook_client_secret: Option<String>,
    /// Public base URL of the dashboard; the OAuth redirect hangs off it.
    pub app_url: Option<String>,
    pub sync_interval_secs: u64,
    pub sync_run_once: bool,
    pub log_format: LogFormat,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: String, reason: String },
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so it can be fed from
    /// something other than the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_URL".to_string()))?;

        // Validate the URL format
        Url::parse(&database_url)
            .map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;

        let meta_base_url = lookup("META_BASE_URL").unwrap_or_else(|| META_BASE_URL.to_string());
        Url::parse(&meta_base_url).map_err(|e| ConfigError::InvalidUrl {
            name: "META_BASE_URL".to_string(),
            reason: e.to_string(),
        })?;

        let app_url = lookup("APP_URL");
        if let Some(app_url) = &app_url {
            Url::parse(app_url).map_err(|e| ConfigError::InvalidUrl {
                name: "APP_URL".to_string(),
                reason: e.to_string(),
            })?;
        }

        let sync_interval_secs = match lookup("SYNC_INTERVAL_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "SYNC_INTERVAL_SECS".to_string(),
                value: raw,
            })?,
            None => SYNC_INTERVAL_SECS,
        };

        let sync_run_once = match lookup("SYNC_RUN_ONCE").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "SYNC_RUN_ONCE".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "LOG_FORMAT".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            database_url,
            meta_base_url,
            meta_api_version: lookup("META_API_VERSION")
                .unwrap_or_else(|| META_API_VERSION.to_string()),
            facebook_client_id: lookup("FACEBOOK_CLIENT_ID"),
            facebook_client_secret: lookup("FACEBOOK_CLIENT_SECRET"),
            app_url,
            sync_interval_secs,
            sync_run_once,
            log_format,
        })
    }

    /// Versioned Graph API root, e.g. `https://graph.facebook.com/v21.0`.
    pub fn meta_api_root(&self) -> String {
        format!(
            "{}/{}",
            self.meta_base_url.trim_end_matches('/'),
            self.meta_api_version
        )
    }
}
