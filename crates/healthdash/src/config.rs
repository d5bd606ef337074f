//! Configuration management for healthdash.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{is_known_method, MethodsMode};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "healthdash";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "health.db";

/// Default export directory name (inside the data directory).
const EXPORT_DIR_NAME: &str = "export";

/// Public HCGateway instance.
const DEFAULT_BASE_URL: &str = "https://api.hcgateway.shuchir.dev";

/// Longest day span accepted for retention and lookback windows.
const MAX_DAYS: u32 = 36_500;

/// Shape accepted for `gateway.base_url`.
static BASE_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/]+(/\S*)?$").expect("Invalid base url pattern"));

/// Placeholder shown instead of secrets.
const REDACTED: &str = "********";

/// Environment variables understood for compatibility with `.env` files
/// written for the gateway collector.
const LEGACY_ENV_KEYS: &[&str] = &[
    "HCG_BASE_URL",
    "HCG_USERNAME",
    "HCG_PASSWORD",
    "TICK_SECONDS",
    "METHODS",
];

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Gateway environment variables (`HCG_USERNAME`, `HCG_PASSWORD`, ...)
/// 2. Environment variables prefixed with `HEALTHDASH_`, sections separated
///    by a double underscore (`HEALTHDASH_COLLECTOR__TICK_SECONDS`)
/// 3. TOML config file at `~/.config/healthdash/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway connection settings.
    pub gateway: GatewayConfig,
    /// Collector loop settings.
    pub collector: CollectorConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Dashboard/report settings.
    pub dashboard: DashboardConfig,
}

/// Health Connect Gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the gateway API.
    pub base_url: String,
    /// Gateway account name.
    pub username: Option<String>,
    /// Gateway account password.
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts for a request that fails transiently.
    pub retry_attempts: u32,
    /// First backoff delay in milliseconds; doubles on every retry.
    pub retry_base_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    pub retry_max_ms: u64,
}

/// Collector-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between collection cycles.
    pub tick_seconds: u64,
    /// Method set to collect when `methods` is empty.
    pub methods_mode: MethodsMode,
    /// Explicit method list; overrides `methods_mode` when non-empty.
    pub methods: Vec<String>,
    /// How far back the first fetch of a method reaches, in hours.
    pub initial_lookback_hours: u32,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/healthdash/health.db`
    pub database_path: Option<PathBuf>,
    /// Directory for CSV exports.
    /// Defaults to `~/.local/share/healthdash/export`
    pub export_dir: Option<PathBuf>,
    /// Maximum age of records to retain in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
}

/// Dashboard-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Title printed above the report.
    pub name: String,
    /// Default lookback for analysis commands, in days.
    pub default_days: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: None,
            password: None,
            timeout_secs: 60,
            retry_attempts: 3,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 180,
            methods_mode: MethodsMode::Core,
            methods: Vec::new(),
            initial_lookback_hours: 24,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            export_dir: None,
            max_age_days: 0,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            name: "Personal Dashboard".to_string(),
            default_days: 30,
        }
    }
}

/// Map the gateway collector's environment names onto config keys.
fn legacy_env() -> Env {
    Env::raw().only(LEGACY_ENV_KEYS).map(|key| {
        let mapped = match key.as_str().to_ascii_uppercase().as_str() {
            "HCG_BASE_URL" => "gateway.base_url".to_string(),
            "HCG_USERNAME" => "gateway.username".to_string(),
            "HCG_PASSWORD" => "gateway.password".to_string(),
            "TICK_SECONDS" => "collector.tick_seconds".to_string(),
            "METHODS" => "collector.methods_mode".to_string(),
            other => other.to_ascii_lowercase(),
        };
        mapped.into()
    })
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file(&config_file))
                .merge(Env::prefixed("HEALTHDASH_").split("__"))
                .merge(legacy_env()),
        )
    }

    /// Extract and validate a configuration from a prepared figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Config = figment.extract()?;
        config.gateway.base_url = config.gateway.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if !BASE_URL_PATTERN.is_match(&self.gateway.base_url) {
            return Err(Error::config(format!(
                "gateway.base_url must be an http(s) URL, got '{}'",
                self.gateway.base_url
            )));
        }

        if self.gateway.retry_attempts == 0 {
            return Err(Error::config("gateway.retry_attempts must be greater than 0"));
        }

        if self.gateway.timeout_secs == 0 {
            return Err(Error::config("gateway.timeout_secs must be greater than 0"));
        }

        if self.gateway.retry_base_ms > self.gateway.retry_max_ms {
            return Err(Error::config(format!(
                "gateway.retry_base_ms ({}) cannot be greater than gateway.retry_max_ms ({})",
                self.gateway.retry_base_ms, self.gateway.retry_max_ms
            )));
        }

        if self.collector.tick_seconds == 0 {
            return Err(Error::config("collector.tick_seconds must be greater than 0"));
        }

        if self.collector.initial_lookback_hours > MAX_DAYS * 24 {
            return Err(Error::config(format!(
                "collector.initial_lookback_hours must be at most {}",
                MAX_DAYS * 24
            )));
        }

        if self.storage.max_age_days > MAX_DAYS {
            return Err(Error::config(format!(
                "storage.max_age_days must be at most {MAX_DAYS}"
            )));
        }

        if self.dashboard.default_days > MAX_DAYS {
            return Err(Error::config(format!(
                "dashboard.default_days must be at most {MAX_DAYS}"
            )));
        }

        if let Some(unknown) = self
            .collector
            .methods
            .iter()
            .find(|m| !is_known_method(m))
        {
            return Err(Error::config(format!(
                "collector.methods contains unknown method '{unknown}'"
            )));
        }

        Ok(())
    }

    /// Methods the collector walks each cycle.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        if self.collector.methods.is_empty() {
            self.collector
                .methods_mode
                .methods()
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            self.collector.methods.clone()
        }
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the export directory, resolving defaults if not set.
    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.storage
            .export_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(EXPORT_DIR_NAME))
    }

    /// Get the max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the collection tick as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.collector.tick_seconds)
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    /// Whether both gateway credentials are present and non-empty.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.gateway.username) && present(&self.gateway.password)
    }

    /// A copy safe to print: the password is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.gateway.password.is_some() {
            copy.gateway.password = Some(REDACTED.to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.gateway.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.collector.tick_seconds, 180);
        assert_eq!(config.collector.methods_mode, MethodsMode::Core);
        assert_eq!(config.dashboard.default_days, 30);
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_default_gateway_config() {
        let gateway = GatewayConfig::default();

        assert_eq!(gateway.timeout_secs, 60);
        assert_eq!(gateway.retry_attempts, 3);
        assert_eq!(gateway.retry_base_ms, 1_000);
        assert_eq!(gateway.retry_max_ms, 30_000);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_tick() {
        let mut config = Config::default();
        config.collector.tick_seconds = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tick_seconds"));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.gateway.retry_attempts = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retry_attempts"));
    }

    #[test]
    fn test_validate_backoff_bounds() {
        let mut config = Config::default();
        config.gateway.retry_base_ms = 60_000;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retry_base_ms"));
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.gateway.base_url = "ftp://example.com".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("base_url"));

        config.gateway.base_url = "http://localhost:6644".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_day_spans_bounded() {
        let mut config = Config::default();
        config.storage.max_age_days = u32::MAX;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_age_days"));

        let mut config = Config::default();
        config.dashboard.default_days = 100_000_000;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_days"));

        let mut config = Config::default();
        config.collector.initial_lookback_hours = u32::MAX;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("initial_lookback_hours"));

        let mut config = Config::default();
        config.storage.max_age_days = MAX_DAYS;
        config.dashboard.default_days = MAX_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_method() {
        let mut config = Config::default();
        config.collector.methods = vec!["steps".to_string(), "mood".to_string()];

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("mood"));
    }

    #[test]
    fn test_methods_from_mode() {
        let mut config = Config::default();
        assert_eq!(config.methods().len(), 5);

        config.collector.methods_mode = MethodsMode::All;
        assert_eq!(config.methods().len(), 33);
    }

    #[test]
    fn test_explicit_methods_override_mode() {
        let mut config = Config::default();
        config.collector.methods_mode = MethodsMode::All;
        config.collector.methods = vec!["weight".to_string()];

        assert_eq!(config.methods(), vec!["weight".to_string()]);
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("health.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_export_dir_default() {
        let path = Config::default().export_dir();
        assert!(path.ends_with("export"));
    }

    #[test]
    fn test_max_age() {
        let mut config = Config::default();
        assert!(config.max_age().is_none());

        config.storage.max_age_days = 7;
        assert_eq!(config.max_age(), Some(Duration::from_secs(7 * 24 * 60 * 60)));
    }

    #[test]
    fn test_intervals() {
        let config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(180));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_has_credentials() {
        let mut config = Config::default();
        config.gateway.username = Some("me".to_string());
        assert!(!config.has_credentials());

        config.gateway.password = Some(String::new());
        assert!(!config.has_credentials());

        config.gateway.password = Some("secret".to_string());
        assert!(config.has_credentials());
    }

    #[test]
    fn test_redacted_hides_password() {
        let mut config = Config::default();
        config.gateway.password = Some("hunter2".to_string());

        let shown = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(REDACTED));
        assert_eq!(config.gateway.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("/nonexistent/config.toml"));

        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_toml_overrides_and_trims_base_url() {
        let toml = r#"
            [gateway]
            base_url = "https://hc.example.org/"
            username = "alice"

            [collector]
            tick_seconds = 60
            methods_mode = "ALL"
        "#;
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml));

        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.gateway.base_url, "https://hc.example.org");
        assert_eq!(config.gateway.username.as_deref(), Some("alice"));
        assert_eq!(config.collector.tick_seconds, 60);
        assert_eq!(config.collector.methods_mode, MethodsMode::All);
    }

    #[test]
    fn test_legacy_env_mapping() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HCG_USERNAME", "bob");
            jail.set_env("HCG_PASSWORD", "pw");
            jail.set_env("TICK_SECONDS", "90");
            jail.set_env("METHODS", "ALL");

            let figment = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(legacy_env());
            let config = Config::from_figment(figment).map_err(|e| e.to_string())?;

            assert_eq!(config.gateway.username.as_deref(), Some("bob"));
            assert!(config.has_credentials());
            assert_eq!(config.collector.tick_seconds, 90);
            assert_eq!(config.collector.methods_mode, MethodsMode::All);
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_nesting() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HEALTHDASH_GATEWAY__RETRY_ATTEMPTS", "5");
            jail.set_env("HEALTHDASH_DASHBOARD__DEFAULT_DAYS", "14");

            let figment = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Env::prefixed("HEALTHDASH_").split("__"));
            let config = Config::from_figment(figment).map_err(|e| e.to_string())?;

            assert_eq!(config.gateway.retry_attempts, 5);
            assert_eq!(config.dashboard.default_days, 14);
            Ok(())
        });
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("healthdash"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
