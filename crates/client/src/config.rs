//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `SHOPSYNC_API_BASE_URL` - Base URL of the shop API (default: `http://localhost:8080/api/v1`)
//! - `SHOPSYNC_REQUEST_TIMEOUT_SECS` - Per-request timeout in seconds (default: 10)
//! - `SHOPSYNC_REFRESH_HORIZON_SECS` - Refresh the access token when it expires within
//!   this many seconds (default: 300)
//! - `SHOPSYNC_TOKEN_FILE` - Where to persist credentials; in-memory only when unset
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REFRESH_HORIZON_SECS: u64 = 300;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every API path is joined onto. Always ends in `/`.
    pub api_base_url: Url,
    /// Timeout applied to every request
    pub request_timeout: Duration,
    /// How close to expiry an access token may get before it is refreshed
    pub refresh_horizon: Duration,
    /// Credential file, if credentials should outlive the process
    pub token_file: Option<PathBuf>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(&format!("{DEFAULT_API_BASE_URL}/"))
                .unwrap_or_else(|_| unreachable!("default base URL is valid")),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_horizon: Duration::from_secs(DEFAULT_REFRESH_HORIZON_SECS),
            token_file: None,
            sentry_dsn: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = parse_base_url(
            "SHOPSYNC_API_BASE_URL",
            &get_env_or_default(&lookup, "SHOPSYNC_API_BASE_URL", DEFAULT_API_BASE_URL),
        )?;
        let request_timeout = get_seconds(
            &lookup,
            "SHOPSYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let refresh_horizon = get_seconds(
            &lookup,
            "SHOPSYNC_REFRESH_HORIZON_SECS",
            DEFAULT_REFRESH_HORIZON_SECS,
        )?;

        Ok(Self {
            api_base_url,
            request_timeout,
            refresh_horizon,
            token_file: get_optional_env(&lookup, "SHOPSYNC_TOKEN_FILE").map(PathBuf::from),
            sentry_dsn: get_optional_env(&lookup, "SENTRY_DSN"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional, non-empty environment variable.
fn get_optional_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    get_optional_env(lookup, key).unwrap_or_else(|| default.to_string())
}

/// Get a whole number of seconds.
fn get_seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = get_optional_env(lookup, key) else {
        return Ok(Duration::from_secs(default));
    };
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse the API base URL, making sure relative joins keep its last segment.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}
