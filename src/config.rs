//! Application configuration
//!
//! YAML file with one section per concern, environment overrides for the API
//! settings, and validation after load.

use crate::downloader::config::{
    RetryPolicy, DEFAULT_CONCURRENCY, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_CONCURRENCY,
    MAX_RETRIES, REQUEST_TIMEOUT_SECS,
};
use crate::fetcher::ApiCredentials;
use crate::output::DEFAULT_EXCLUDED_COLUMNS;
use crate::registry::{Device, DeviceRegistry, RegistryError, DEFAULT_NAME_COLUMN, DEFAULT_SERIAL_COLUMN};
use crate::resume::PersistPolicy;
use crate::DateRange;
use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default API host
pub const DEFAULT_BASE_URL: &str = "https://globalapi.solarmanpv.com";

/// Default collection offset (South Africa Standard Time, no DST)
pub const DEFAULT_UTC_OFFSET: &str = "+02:00";

/// Environment variables overriding `api.*` settings
pub const ENV_OVERRIDES: [&str; 7] = [
    "API_BASE_URL",
    "API_TOKEN",
    "API_APP_ID",
    "API_APP_SECRET",
    "API_EMAIL",
    "API_PASSWORD",
    "API_ORG_ID",
];

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API endpoint and credentials.
    #[serde(default)]
    pub api: ApiConfig,

    /// Days to collect.
    pub date_range: DateRangeConfig,

    /// Device registry source.
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Fetch concurrency, retry and timeout policy.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Checkpoint location and persist policy.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// CSV output.
    #[serde(default)]
    pub output: OutputConfig,

    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// API endpoint and credentials.
#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    /// API base URL. Default: the global Solarman host.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pre-issued bearer token; skips the token endpoint when set.
    #[serde(default)]
    pub token: Option<String>,

    /// Application id.
    #[serde(default)]
    pub app_id: String,

    /// Application secret.
    #[serde(default)]
    pub app_secret: String,

    /// Account email.
    #[serde(default)]
    pub email: String,

    /// Account password.
    #[serde(default)]
    pub password: String,

    /// Organisation id.
    #[serde(default)]
    pub org_id: Option<String>,

    /// TCP connect timeout. Default: 10s.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("app_id", &self.app_id)
            .field("email", &self.email)
            .field("org_id", &self.org_id)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            app_id: String::new(),
            app_secret: String::new(),
            email: String::new(),
            password: String::new(),
            org_id: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Deserialize)]
pub struct DateRangeConfig {
    /// First day (`YYYY-MM-DD`).
    pub start: NaiveDate,

    /// Last day, inclusive (`YYYY-MM-DD`).
    pub end: NaiveDate,

    /// Offset day boundaries are computed in. Default: "+02:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

/// Device registry source: an inline list or a CSV file.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicesConfig {
    /// Inline devices.
    #[serde(default)]
    pub list: Vec<Device>,

    /// CSV registry file.
    #[serde(default)]
    pub registry_file: Option<PathBuf>,

    /// Serial column in the CSV file. Default: "SN".
    #[serde(default = "default_serial_column")]
    pub serial_column: String,

    /// Name column in the CSV file. Default: "Connected Plant".
    #[serde(default = "default_name_column")]
    pub name_column: String,

    /// Process devices ordered by display name. Default: false.
    #[serde(default)]
    pub sort_by_name: bool,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            list: Vec::new(),
            registry_file: None,
            serial_column: default_serial_column(),
            name_column: default_name_column(),
            sort_by_name: false,
        }
    }
}

/// Fetch policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Concurrent fetches per device. Default: 30.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Total attempts per unit. Default: 5.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff. Default: 1s.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff cap. Default: 30s.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Per-attempt timeout. Default: 60s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint file. Default: "checkpoints/progress.json".
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,

    /// Rename attempts per persist. Default: 5.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,

    /// First rename backoff. Default: 100ms.
    #[serde(default = "default_persist_initial_backoff", with = "humantime_serde")]
    pub persist_initial_backoff: Duration,

    /// Rename backoff cap. Default: 2s.
    #[serde(default = "default_persist_max_backoff", with = "humantime_serde")]
    pub persist_max_backoff: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            persist_attempts: default_persist_attempts(),
            persist_initial_backoff: default_persist_initial_backoff(),
            persist_max_backoff: default_persist_max_backoff(),
        }
    }
}

/// CSV output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Output root. Default: "raw_data".
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Attribute columns to drop. Default: ["Battery Mode"].
    #[serde(default = "default_exclude_columns")]
    pub exclude_columns: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            exclude_columns: default_exclude_columns(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Scrape endpoint address; disabled when unset.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

/// How the run obtains its credential
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Pre-issued token
    Token(String),
    /// Token endpoint with account settings
    Account(ApiCredentials),
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `API_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `API_*` overrides from `lookup`; empty values are ignored.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = get("API_TOKEN") {
            self.api.token = Some(v);
        }
        if let Some(v) = get("API_APP_ID") {
            self.api.app_id = v;
        }
        if let Some(v) = get("API_APP_SECRET") {
            self.api.app_secret = v;
        }
        if let Some(v) = get("API_EMAIL") {
            self.api.email = v;
        }
        if let Some(v) = get("API_PASSWORD") {
            self.api.password = v;
        }
        if let Some(v) = get("API_ORG_ID") {
            self.api.org_id = Some(v);
        }
    }

    /// Validate settings that do not depend on credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.api.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(invalid("api.base_url must start with http:// or https://"));
        }
        if self.api.connect_timeout.is_zero() {
            return Err(invalid("api.connect_timeout must be positive"));
        }

        self.date_range()?;

        if self.devices.list.is_empty() && self.devices.registry_file.is_none() {
            return Err(invalid("devices.list or devices.registry_file is required"));
        }
        if !self.devices.list.is_empty() && self.devices.registry_file.is_some() {
            return Err(invalid(
                "devices.list and devices.registry_file are mutually exclusive",
            ));
        }

        let fetch = &self.fetch;
        if fetch.concurrency == 0 || fetch.concurrency > MAX_CONCURRENCY {
            return Err(invalid(format!(
                "fetch.concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if fetch.max_retries == 0 {
            return Err(invalid("fetch.max_retries must be at least 1"));
        }
        if fetch.initial_backoff.is_zero() {
            return Err(invalid("fetch.initial_backoff must be positive"));
        }
        if fetch.max_backoff < fetch.initial_backoff {
            return Err(invalid("fetch.max_backoff must be >= fetch.initial_backoff"));
        }
        if fetch.request_timeout.is_zero() {
            return Err(invalid("fetch.request_timeout must be positive"));
        }

        if self.checkpoint.path.as_os_str().is_empty() {
            return Err(invalid("checkpoint.path is required"));
        }
        if self.checkpoint.persist_attempts == 0 {
            return Err(invalid("checkpoint.persist_attempts must be at least 1"));
        }
        if self.output.dir.as_os_str().is_empty() {
            return Err(invalid("output.dir is required"));
        }

        Ok(())
    }

    /// Credential source, preferring a pre-issued token.
    pub fn credential_source(&self) -> Result<CredentialSource, ConfigError> {
        if let Some(token) = self.api.token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(CredentialSource::Token(token.clone()));
        }
        let credentials = ApiCredentials {
            app_id: self.api.app_id.clone(),
            app_secret: self.api.app_secret.clone(),
            email: self.api.email.clone(),
            password: self.api.password.clone(),
            org_id: self.api.org_id.clone(),
        };
        if let Some(field) = credentials.missing_field() {
            return Err(invalid(format!(
                "api.{field} is required when api.token is not set (or set API_TOKEN)"
            )));
        }
        Ok(CredentialSource::Account(credentials))
    }

    /// Collection date range.
    pub fn date_range(&self) -> Result<DateRange, ConfigError> {
        let offset = parse_utc_offset(&self.date_range.utc_offset)?;
        DateRange::new(self.date_range.start, self.date_range.end, offset)
            .map_err(|e| invalid(format!("date_range: {e}")))
    }

    /// Retry policy with CLI overrides applied by the caller.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.fetch.max_retries,
            initial_backoff: self.fetch.initial_backoff,
            max_backoff: self.fetch.max_backoff,
            request_timeout: self.fetch.request_timeout,
        }
    }

    /// Checkpoint persist policy.
    pub fn persist_policy(&self) -> PersistPolicy {
        PersistPolicy {
            max_attempts: self.checkpoint.persist_attempts,
            initial_backoff: self.checkpoint.persist_initial_backoff,
            max_backoff: self.checkpoint.persist_max_backoff,
        }
    }

    /// Build the device registry from the configured source.
    pub fn load_registry(&self) -> Result<DeviceRegistry, RegistryError> {
        let registry = match &self.devices.registry_file {
            Some(path) => DeviceRegistry::from_csv_path(
                path,
                &self.devices.serial_column,
                &self.devices.name_column,
            )?,
            None => DeviceRegistry::from_devices(self.devices.list.clone())?,
        };
        Ok(if self.devices.sort_by_name {
            registry.sorted_by_name()
        } else {
            registry
        })
    }
}

/// Parse `Z`, `UTC`, `+HH`, `+HHMM` or `+HH:MM` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| invalid("invalid UTC offset"));
    }

    let err = || invalid(format!("date_range.utc_offset '{raw}' must look like +02:00"));
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(err()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) || !matches!(digits.len(), 2 | 4) {
        return Err(err());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| err())?;
    let minutes: i32 = if digits.len() == 4 {
        digits[2..].parse().map_err(|_| err())?
    } else {
        0
    };
    if hours > 14 || minutes > 59 {
        return Err(err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_utc_offset() -> String {
    DEFAULT_UTC_OFFSET.to_string()
}

fn default_serial_column() -> String {
    DEFAULT_SERIAL_COLUMN.to_string()
}

fn default_name_column() -> String {
    DEFAULT_NAME_COLUMN.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS)
}

fn default_max_backoff() -> Duration {
    Duration::from_millis(MAX_BACKOFF_MS)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(REQUEST_TIMEOUT_SECS)
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoints/progress.json")
}

fn default_persist_attempts() -> u32 {
    PersistPolicy::default().max_attempts
}

fn default_persist_initial_backoff() -> Duration {
    PersistPolicy::default().initial_backoff
}

fn default_persist_max_backoff() -> Duration {
    PersistPolicy::default().max_backoff
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("raw_data")
}

fn default_exclude_columns() -> Vec<String> {
    DEFAULT_EXCLUDED_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// OS error
        message: String,
    },

    /// YAML could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A setting is invalid
    #[error("invalid config: {0}")]
    Invalid(String),
}
