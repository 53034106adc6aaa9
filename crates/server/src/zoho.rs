//! Zoho CRM v2 REST client.
//!
//! Access tokens come from the OAuth refresh-token grant and are cached until
//! shortly before they expire. Every read and write goes through
//! [`ZohoClient`], which implements the core `RemoteStore` seam.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clientdesk_core::config::CrmConfig;
use clientdesk_core::domain::record::Fields;
use clientdesk_core::store::{RemoteStore, SearchQuery, StoreError};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

/// Refresh-token exchange with a shared cache. The cache lock is held across
/// the refresh, so concurrent callers wait for one exchange instead of each
/// starting their own.
pub struct TokenProvider {
    client: Client,
    auth_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    refresh_margin: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: Client, config: &CrmConfig) -> Self {
        Self {
            client,
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            refresh_margin: Duration::from_secs(config.token_refresh_margin_secs),
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<SecretString, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + self.refresh_margin < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token so the next call exchanges again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh(&self) -> Result<CachedToken, StoreError> {
        let response = self
            .client
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.expose_secret()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|error| StoreError::Auth(format!("token request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Auth(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|error| StoreError::Auth(format!("could not decode token response: {error}")))?;
        let Some(access_token) = body.access_token.filter(|token| !token.is_empty()) else {
            let reason = body.error.unwrap_or_else(|| "no access token in response".to_string());
            return Err(StoreError::Auth(reason));
        };

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        info!(
            event_name = "crm.auth.token_refreshed",
            expires_in_secs = lifetime.as_secs(),
            "crm access token refreshed"
        );
        Ok(CachedToken { value: SecretString::from(access_token), expires_at: Instant::now() + lifetime })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid crm api base url `{url}`: {reason}")]
    BaseUrl { url: String, reason: String },
}

#[derive(Clone)]
pub struct ZohoClient {
    client: Client,
    base_url: Url,
    auth_scheme: String,
    tokens: Arc<TokenProvider>,
}

impl ZohoClient {
    pub fn new(config: &CrmConfig) -> Result<Self, ClientBuildError> {
        let base_url = Url::parse(&config.api_base_url).map_err(|error| ClientBuildError::BaseUrl {
            url: config.api_base_url.clone(),
            reason: error.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientBuildError::BaseUrl {
                url: config.api_base_url.clone(),
                reason: "not a hierarchical url".to_string(),
            });
        }
        let client = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs)).build()?;
        let tokens = Arc::new(TokenProvider::new(client.clone(), config));
        Ok(Self {
            client,
            base_url,
            auth_scheme: config.auth_scheme.clone(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    /// Module names, ids and list names are percent-encoded as single segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Sends with the cached token; a 401 invalidates it and retries once
    /// with a fresh one.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut refreshed = false;
        loop {
            let token = self.tokens.access_token().await?;
            let response = build(&self.client)
                .header(AUTHORIZATION, format!("{} {}", self.auth_scheme, token.expose_secret()))
                .send()
                .await
                .map_err(transport_error)?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(event_name = "crm.auth.token_rejected", "access token rejected; refreshing");
                self.tokens.invalidate().await;
                refreshed = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn read(&self, url: Url, query: Vec<(&'static str, String)>, key: &str) -> Result<Vec<Fields>, StoreError> {
        let response = self.send(|client| client.get(url.clone()).query(&query)).await?;
        let body = decode(check(response).await?).await?;
        Ok(rows(&body, key))
    }

    async fn write(&self, response: Response) -> Result<Fields, StoreError> {
        let body = decode(check(response).await?).await?;
        write_result(&body)
    }
}

#[async_trait]
impl RemoteStore for ZohoClient {
    async fn get_record(&self, module: &str, id: &str) -> Result<Fields, StoreError> {
        let rows = self.read(self.url(&[module, id]), Vec::new(), "data").await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn get_user(&self, id: &str) -> Result<Fields, StoreError> {
        let rows = self.read(self.url(&["users", id]), Vec::new(), "users").await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn get_related(
        &self,
        module: &str,
        id: &str,
        list: &str,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError> {
        self.read(self.url(&[module, id, list]), vec![("per_page", per_page.to_string())], "data").await
    }

    async fn search(
        &self,
        module: &str,
        query: &SearchQuery,
        per_page: u32,
    ) -> Result<Vec<Fields>, StoreError> {
        let param = match query {
            SearchQuery::Criteria(criteria) => ("criteria", criteria.render()),
            SearchQuery::Word(word) => ("word", word.clone()),
        };
        debug!(event_name = "crm.search.sent", module, mode = param.0, "crm search");
        self.read(self.url(&[module, "search"]), vec![param, ("per_page", per_page.to_string())], "data").await
    }

    async fn create(&self, module: &str, data: &Fields) -> Result<Fields, StoreError> {
        let url = self.url(&[module]);
        let body = json!({ "data": [data] });
        let response = self.send(|client| client.post(url.clone()).json(&body)).await?;
        self.write(response).await
    }

    async fn update(&self, module: &str, id: &str, data: &Fields) -> Result<Fields, StoreError> {
        let url = self.url(&[module, id]);
        let body = json!({ "data": [data] });
        let response = self.send(|client| client.put(url.clone()).json(&body)).await?;
        let mut row = self.write(response).await?;
        row.entry("id".to_string()).or_insert_with(|| Value::String(id.to_string()));
        Ok(row)
    }
}

fn transport_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transport(error.to_string())
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    match status {
        StatusCode::NO_CONTENT => Err(StoreError::NoContent),
        StatusCode::NOT_FOUND => Err(StoreError::NotFound),
        StatusCode::UNAUTHORIZED => Err(StoreError::Auth("access token rejected after refresh".to_string())),
        status if status.is_success() => Ok(response),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Status { status: status.as_u16(), body })
        }
    }
}

async fn decode(response: Response) -> Result<Value, StoreError> {
    let text = response.text().await.map_err(transport_error)?;
    if text.trim().is_empty() {
        return Err(StoreError::NoContent);
    }
    serde_json::from_str(&text).map_err(|error| StoreError::Decode(error.to_string()))
}

fn rows(body: &Value, key: &str) -> Vec<Fields> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(|row| row.as_object().cloned()).collect())
        .unwrap_or_default()
}

/// Writes answer with `{"data": [{"code", "status", "message", "details"}]}`;
/// the returned row is `details`, which carries the record id.
fn write_result(body: &Value) -> Result<Fields, StoreError> {
    let Some(entry) = body.get("data").and_then(Value::as_array).and_then(|rows| rows.first()) else {
        return Err(StoreError::Decode("write response carried no data".to_string()));
    };

    let status = entry.get("status").and_then(Value::as_str).unwrap_or("success");
    if !status.eq_ignore_ascii_case("success") {
        let code = entry.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let message = entry.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(StoreError::Status { status: 400, body: format!("{code}: {message}") });
    }

    Ok(entry.get("details").and_then(Value::as_object).cloned().unwrap_or_default())
}
