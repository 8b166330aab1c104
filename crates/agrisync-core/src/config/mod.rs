//! Runtime configuration for the sync engine.
//!
//! Settings come from `AGRISYNC_*` environment variables. Every numeric
//! value has a default and an accepted range; values outside the range are
//! rejected rather than clamped.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

use crate::models::DEFAULT_WRITER_ID;
use crate::sync::RetryPolicy;
use crate::util::is_http_url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Sync engine settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Server base URL, without a trailing slash
    pub api_base_url: Option<String>,
    pub retry: RetryPolicy,
    /// Operations claimed per drain
    pub batch_size: usize,
    /// Periodic drain interval
    pub tick_interval: Duration,
    pub request_timeout: Duration,
    /// Reachability probe interval
    pub probe_interval: Duration,
    /// Provenance stamped on local writes
    pub writer_id: String,
    /// Opaque bearer credential
    pub token: Option<String>,
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_base_url", &self.api_base_url)
            .field("retry", &self.retry)
            .field("batch_size", &self.batch_size)
            .field("tick_interval", &self.tick_interval)
            .field("request_timeout", &self.request_timeout)
            .field("probe_interval", &self.probe_interval)
            .field("writer_id", &self.writer_id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            retry: RetryPolicy::default(),
            batch_size: 10,
            tick_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(15),
            writer_id: DEFAULT_WRITER_ID.to_string(),
            token: None,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = optional_trimmed(&lookup, "AGRISYNC_API_BASE_URL")
            .map(|value| normalize_base_url(&value))
            .transpose()?;

        let max_retries = ranged(&lookup, "AGRISYNC_MAX_RETRIES", 5, 1..=20)?;
        let base_delay_ms = ranged(&lookup, "AGRISYNC_BACKOFF_BASE_MS", 500, 10..=60_000)?;
        let max_delay_ms = ranged(
            &lookup,
            "AGRISYNC_BACKOFF_MAX_MS",
            10_000.max(base_delay_ms),
            base_delay_ms..=3_600_000,
        )?;
        let batch_size = ranged(&lookup, "AGRISYNC_BATCH_SIZE", 10, 1..=500)?;
        let tick_secs = ranged(&lookup, "AGRISYNC_TICK_SECS", 10, 1..=3_600)?;
        let timeout_secs = ranged(&lookup, "AGRISYNC_REQUEST_TIMEOUT_SECS", 30, 1..=300)?;
        let probe_secs = ranged(&lookup, "AGRISYNC_PROBE_SECS", 15, 1..=3_600)?;

        let writer_id = value_or_default(&lookup, "AGRISYNC_WRITER_ID", DEFAULT_WRITER_ID);
        let token = optional_trimmed(&lookup, "AGRISYNC_TOKEN");

        Ok(Self {
            api_base_url,
            retry: RetryPolicy::new(
                u32::try_from(max_retries).unwrap_or(u32::MAX),
                Duration::from_millis(base_delay_ms),
                Duration::from_millis(max_delay_ms),
            ),
            batch_size: usize::try_from(batch_size).unwrap_or(usize::MAX),
            tick_interval: Duration::from_secs(tick_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            probe_interval: Duration::from_secs(probe_secs),
            writer_id,
            token,
        })
    }

    /// Base URL, or an error naming the variable that provides it.
    pub fn require_api_base_url(&self) -> Result<&str, ConfigError> {
        self.api_base_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("AGRISYNC_API_BASE_URL"))
    }
}

/// Trim a base URL and require an http(s) scheme.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(
            "API base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(ConfigError::Invalid(
            "API base URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn ranged(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
