//! HTTP client for the Health Connect Gateway v2 API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{query_since, records_from_body, HealthSource, RetryPolicy, TokenBundle};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::record::HealthRecord;

const LOGIN_PATH: &str = "/api/v2/login";
const REFRESH_PATH: &str = "/api/v2/refresh";
const FETCH_PATH: &str = "/api/v2/fetch";

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Gateway client with lazy login, token refresh and retries.
pub struct GatewayClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    retry: RetryPolicy,
    token: Mutex<Option<TokenBundle>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a client from the gateway configuration.
    ///
    /// No request is made until the first fetch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] when username or password is
    /// unset, or an HTTP error if the client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let (Some(username), Some(password)) =
            (non_empty(&config.username), non_empty(&config.password))
        else {
            return Err(Error::MissingCredentials);
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username,
            password,
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                base: Duration::from_millis(config.retry_base_ms),
                max: Duration::from_millis(config.retry_max_ms),
            },
            token: Mutex::new(None),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log in with the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the credentials or the
    /// response is not a token bundle.
    pub async fn login(&self) -> Result<TokenBundle> {
        debug!("Logging in to {}", self.base_url);
        let body = json!({"username": self.username, "password": self.password});
        let response = self.post_with_retry(LOGIN_PATH, &body, None).await?;
        let bundle = TokenBundle::from_json(response)?;
        info!(expiry = %bundle.expiry, "Logged in to gateway");
        Ok(bundle)
    }

    /// Exchange a refresh token for a new bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway rejects the refresh token.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenBundle> {
        debug!("Refreshing gateway token");
        let body = json!({"refresh": refresh});
        let response = self.post_with_retry(REFRESH_PATH, &body, None).await?;
        TokenBundle::from_json(response)
    }

    /// Return a bearer token that is not about to expire.
    ///
    /// Logs in on first use and refreshes within five minutes of expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if neither refresh nor login succeeds.
    pub async fn ensure_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let bundle = match guard.take() {
            Some(current) if !current.needs_refresh(Utc::now()) => current,
            Some(current) => self.renew(&current).await?,
            None => self.login().await?,
        };
        let token = bundle.token.clone();
        *guard = Some(bundle);
        Ok(token)
    }

    /// Replace the token after the gateway rejected it.
    async fn reauthenticate(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let bundle = match guard.take() {
            Some(current) => self.renew(&current).await?,
            None => self.login().await?,
        };
        let token = bundle.token.clone();
        *guard = Some(bundle);
        Ok(token)
    }

    async fn renew(&self, current: &TokenBundle) -> Result<TokenBundle> {
        match self.refresh(&current.refresh).await {
            Ok(bundle) => Ok(bundle),
            Err(e) => {
                warn!("Token refresh failed, logging in again: {}", e);
                self.login().await
            }
        }
    }

    /// Fetch the raw JSON body for `method` since `since`.
    ///
    /// A 401 triggers one token renewal and a single repeat of the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request keeps failing.
    pub async fn fetch_raw(&self, method: &str, since: DateTime<Utc>) -> Result<Value> {
        let endpoint = format!("{FETCH_PATH}/{method}");
        let body = query_since(since);

        let token = self.ensure_token().await?;
        match self.post_with_retry(&endpoint, &body, Some(&token)).await {
            Err(e) if e.is_unauthorized() => {
                warn!(method, "Gateway rejected token, renewing");
                let token = self.reauthenticate().await?;
                self.post_with_retry(&endpoint, &body, Some(&token)).await
            }
            other => other,
        }
    }

    async fn post_with_retry(
        &self,
        endpoint: &str,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(endpoint, body, bearer).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        endpoint,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, endpoint: &str, body: &Value, bearer: Option<&str>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }

        let text = response.text().await?;
        if !status.is_success() {
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(Error::gateway_status(status.as_u16(), endpoint, snippet));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait::async_trait]
impl HealthSource for GatewayClient {
    fn name(&self) -> &str {
        "hcgateway"
    }

    async fn fetch(&self, method: &str, since: DateTime<Utc>) -> Result<Vec<HealthRecord>> {
        let body = self.fetch_raw(method, since).await?;
        let records = records_from_body(&body, Utc::now());
        debug!(method, count = records.len(), "Fetched records");
        Ok(records)
    }
}
