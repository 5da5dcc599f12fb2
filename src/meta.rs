use crate::constants::{
    META_ACCOUNT_FIELDS, META_CAMPAIGN_FIELDS, META_INSIGHT_FIELDS, META_LIFETIME_PRESET,
};
use crate::models::InsightWindow;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetaApiError {
    /// Well-formed error payload from the platform; message kept verbatim.
    #[error("{message}")]
    Platform { message: String, code: Option<i64> },
    #[error("Transport error: HTTP {status}")]
    Transport { status: u16 },
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Raw HTTP outcome, before any Graph-specific interpretation.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait GraphTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer_token: Option<&str>,
    ) -> Result<GraphResponse, MetaApiError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer_token: Option<&str>,
    ) -> Result<GraphResponse, MetaApiError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetaApiError::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| MetaApiError::RequestFailed(e.to_string()))?;

        Ok(GraphResponse { status, body })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAdAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCampaign {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_time: Option<String>,
}

/// One day of campaign insights as the platform sends it: numbers arrive as
/// strings and may be missing or junk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInsight {
    #[serde(default, deserialize_with = "lenient_string")]
    pub impressions: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub clicks: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub spend: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ctr: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cpc: Option<String>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_stop: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAction {
    pub action_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlatformError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

// Accepts a JSON string or number, anything else becomes None.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Splits a response into platform error, transport error or a JSON body.
fn decode<T: DeserializeOwned>(response: GraphResponse) -> Result<T, MetaApiError> {
    let parsed = serde_json::from_str::<serde_json::Value>(&response.body);

    if let Ok(value) = &parsed {
        if let Some(error) = value.get("error") {
            let error: PlatformError = serde_json::from_value(error.clone())
                .map_err(|e| MetaApiError::InvalidResponse(e.to_string()))?;
            return Err(MetaApiError::Platform {
                message: error.message,
                code: error.code,
            });
        }
    }

    if !(200..300).contains(&response.status) {
        return Err(MetaApiError::Transport {
            status: response.status,
        });
    }

    let value = parsed.map_err(|e| MetaApiError::InvalidResponse(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| MetaApiError::InvalidResponse(e.to_string()))
}

pub struct MetaApi<T = ReqwestTransport> {
    transport: T,
    base_url: String,
}

impl MetaApi<ReqwestTransport> {
    /// `base_url` is the versioned Graph root, e.g. `https://graph.facebook.com/v21.0`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(ReqwestTransport::new(), base_url)
    }
}

impl<T: GraphTransport> MetaApi<T> {
    pub fn with_transport(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Fetches `path` and every following page, in page order.
    pub async fn fetch_all<R: DeserializeOwned>(
        &self,
        path: &str,
        fields: &str,
        params: &[(&str, String)],
        access_token: &str,
    ) -> Result<Vec<R>, MetaApiError> {
        let mut url = self.url(path);
        let mut query: Vec<(String, String)> = std::iter::once(("fields".to_string(), fields.to_string()))
            .chain(params.iter().map(|(k, v)| (k.to_string(), v.clone())))
            .collect();

        let mut records = Vec::new();
        let mut seen = HashSet::new();

        loop {
            let response = self.transport.get(&url, &query, Some(access_token)).await?;
            let page: Page<R> = decode(response)?;
            records.extend(page.data);

            match page.paging.and_then(|p| p.next) {
                Some(next) => {
                    // A repeated cursor would loop forever
                    if !seen.insert(next.clone()) {
                        return Err(MetaApiError::InvalidResponse(format!(
                            "pagination cycle at {}",
                            next
                        )));
                    }
                    // The next link already carries the full query
                    url = next;
                    query.clear();
                }
                None => break,
            }
        }

        Ok(records)
    }

    pub async fn ad_accounts(&self, access_token: &str) -> Result<Vec<RawAdAccount>, MetaApiError> {
        self.fetch_all("me/adaccounts", META_ACCOUNT_FIELDS, &[], access_token)
            .await
    }

    pub async fn campaigns(
        &self,
        ad_account_id: &str,
        access_token: &str,
    ) -> Result<Vec<RawCampaign>, MetaApiError> {
        self.fetch_all(
            &format!("{}/campaigns", ad_account_id),
            META_CAMPAIGN_FIELDS,
            &[],
            access_token,
        )
        .await
    }

    /// Daily insight rows for one campaign. `today` anchors the yesterday window.
    pub async fn campaign_insights(
        &self,
        campaign_id: &str,
        window: InsightWindow,
        today: NaiveDate,
        access_token: &str,
    ) -> Result<Vec<RawInsight>, MetaApiError> {
        let mut params = vec![("time_increment", "1".to_string())];
        params.extend(window_params(window, today));

        self.fetch_all(
            &format!("{}/insights", campaign_id),
            META_INSIGHT_FIELDS,
            &params,
            access_token,
        )
        .await
    }

    /// Trades an OAuth authorization code for a short-lived user token.
    pub async fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, MetaApiError> {
        let query = vec![
            ("client_id".to_string(), client.client_id.clone()),
            ("client_secret".to_string(), client.client_secret.clone()),
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("code".to_string(), code.to_string()),
        ];
        let response = self
            .transport
            .get(&self.url("oauth/access_token"), &query, None)
            .await?;
        decode(response)
    }

    /// Trades a short-lived token for a long-lived one with an explicit expiry.
    pub async fn exchange_long_lived(
        &self,
        client: &OAuthClient,
        short_lived_token: &str,
    ) -> Result<TokenResponse, MetaApiError> {
        let query = vec![
            ("grant_type".to_string(), "fb_exchange_token".to_string()),
            ("client_id".to_string(), client.client_id.clone()),
            ("client_secret".to_string(), client.client_secret.clone()),
            ("fb_exchange_token".to_string(), short_lived_token.to_string()),
        ];
        let response = self
            .transport
            .get(&self.url("oauth/access_token"), &query, None)
            .await?;
        decode(response)
    }
}

fn window_params(window: InsightWindow, today: NaiveDate) -> Vec<(&'static str, String)> {
    let time_range = |since: NaiveDate, until: NaiveDate| {
        serde_json::json!({
            "since": since.format("%Y-%m-%d").to_string(),
            "until": until.format("%Y-%m-%d").to_string(),
        })
        .to_string()
    };

    match window {
        InsightWindow::Lifetime => vec![("date_preset", META_LIFETIME_PRESET.to_string())],
        InsightWindow::Range { since, until } => vec![("time_range", time_range(since, until))],
        InsightWindow::Yesterday => {
            let yesterday = today - Duration::days(1);
            vec![("time_range", time_range(yesterday, yesterday))]
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned responses keyed by exact URL, optionally narrowed to a
    /// bearer token; unknown URLs get a bare 404.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: HashMap<(Option<String>, String), GraphResponse>,
        pub requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, url: &str, status: u16, body: serde_json::Value) -> Self {
            self.insert(None, url, status, body.to_string())
        }

        pub fn route_for_token(
            self,
            token: &str,
            url: &str,
            status: u16,
            body: serde_json::Value,
        ) -> Self {
            self.insert(Some(token), url, status, body.to_string())
        }

        pub fn raw(self, url: &str, status: u16, body: &str) -> Self {
            self.insert(None, url, status, body.to_string())
        }

        fn insert(mut self, token: Option<&str>, url: &str, status: u16, body: String) -> Self {
            self.routes.insert(
                (token.map(str::to_string), url.to_string()),
                GraphResponse { status, body },
            );
            self
        }
    }

    #[async_trait]
    impl GraphTransport for ScriptedTransport {
        async fn get(
            &self,
            url: &str,
            query: &[(String, String)],
            bearer_token: Option<&str>,
        ) -> Result<GraphResponse, MetaApiError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), query.to_vec()));

            let scoped = (bearer_token.map(str::to_string), url.to_string());
            let shared = (None, url.to_string());
            Ok(self
                .routes
                .get(&scoped)
                .or_else(|| self.routes.get(&shared))
                .cloned()
                .unwrap_or(GraphResponse {
                    status: 404,
                    body: String::new(),
                }))
        }
    }
}
