//! Health Connect Gateway access.
//!
//! The collector talks to the gateway through the [`HealthSource`] trait so
//! that it can be driven by a fake source in tests. [`GatewayClient`] is the
//! HTTP implementation.

mod client;

pub use client::GatewayClient;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::record::{parse_timestamp, HealthRecord};

/// Seconds before expiry at which a token is considered stale.
pub const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// A source of health records, queried per method.
#[async_trait::async_trait]
pub trait HealthSource: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Fetch every record of `method` whose start is at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached or rejects the request.
    async fn fetch(&self, method: &str, since: DateTime<Utc>) -> Result<Vec<HealthRecord>>;
}

/// Access and refresh tokens issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    /// Bearer token for API calls.
    pub token: String,
    /// Token used to obtain a new bundle.
    pub refresh: String,
    /// When `token` stops being accepted.
    pub expiry: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTokenBundle {
    token: String,
    refresh: String,
    expiry: String,
}

impl TokenBundle {
    /// Parse the `{token, refresh, expiry}` body returned by login and refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or the expiry is not a timestamp.
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawTokenBundle = serde_json::from_value(value)
            .map_err(|e| Error::invalid_token(e.to_string()))?;
        let expiry = parse_timestamp(&raw.expiry)
            .ok_or_else(|| Error::invalid_token(format!("unparsable expiry '{}'", raw.expiry)))?;

        Ok(Self {
            token: raw.token,
            refresh: raw.refresh,
            expiry,
        })
    }

    /// True when the token expires within the refresh buffer of `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.is_expiring(now, chrono::Duration::seconds(TOKEN_REFRESH_BUFFER_SECS))
    }

    /// True when the token expires within `buffer` of `now`.
    #[must_use]
    pub fn is_expiring(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        now + buffer >= self.expiry
    }
}

/// Exponential backoff for transient gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Build the fetch body selecting records that start at or after `since`.
#[must_use]
pub fn query_since(since: DateTime<Utc>) -> Value {
    json!({
        "queries": {
            "start": { "$gte": since.to_rfc3339_opts(SecondsFormat::Secs, true) }
        }
    })
}

/// Turn a fetch response body into records.
///
/// Anything other than a JSON array is treated as "no records"; array items
/// that are not objects are dropped.
#[must_use]
pub fn records_from_body(body: &Value, ingested_at: DateTime<Utc>) -> Vec<HealthRecord> {
    let Some(items) = body.as_array() else {
        tracing::debug!("Fetch response is not an array; treating as empty");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| HealthRecord::from_gateway(item, ingested_at))
        .collect()
}
