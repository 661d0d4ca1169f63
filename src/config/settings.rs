//! Application settings loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application identity used when reconnecting stored sessions.
///
/// Session reuse only needs an `api_id`; the API hash is used for
/// interactive login, which pooled accounts never do. The default is a
/// non-secret placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Telegram API ID.
    #[serde(default = "default_api_id")]
    pub api_id: i32,
}

fn default_api_id() -> i32 {
    1
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_id: default_api_id(),
        }
    }
}

impl IdentityConfig {
    /// Creates a new identity configuration.
    #[must_use]
    pub fn new(api_id: i32) -> Self {
        Self { api_id }
    }

    /// Creates configuration from `TG_API_ID`, falling back to the
    /// placeholder identity.
    ///
    /// # Errors
    ///
    /// Returns an error if `TG_API_ID` is set but is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id = match std::env::var("TG_API_ID") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidApiId)?,
            Err(_) => default_api_id(),
        };

        Ok(Self { api_id })
    }
}

/// Where accounts, blobs and local session copies live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// PostgreSQL connection string.
    pub database_url: String,

    /// Base URL of an S3-compatible endpoint (path-style addressing).
    pub blob_endpoint: Option<String>,

    /// Bucket holding the session blobs.
    pub blob_bucket: Option<String>,

    /// Bearer token sent to the blob endpoint, if it requires one.
    pub blob_token: Option<String>,

    /// Directory used as the blob store when no endpoint is configured.
    pub blob_dir: Option<PathBuf>,

    /// Key prefix for session blobs.
    #[serde(default = "default_sessions_prefix")]
    pub sessions_prefix: String,

    /// Ordered local fallback directories for session files.
    #[serde(default = "default_local_dirs")]
    pub local_session_dirs: Vec<PathBuf>,
}

fn default_sessions_prefix() -> String {
    "sessions".to_owned()
}

fn default_local_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("adminbot/sessions"), PathBuf::from(".")]
}

impl StorageConfig {
    /// Creates storage configuration from environment variables.
    ///
    /// Expects `DATABASE_URL` to be set. `LOCAL_SESSION_DIRS` uses the
    /// platform path-list separator.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL"))?;

        let local_session_dirs = std::env::var_os("LOCAL_SESSION_DIRS").map_or_else(
            default_local_dirs,
            |raw| std::env::split_paths(&raw).collect(),
        );

        Ok(Self {
            database_url,
            blob_endpoint: non_empty_var("BLOB_ENDPOINT"),
            blob_bucket: non_empty_var("BLOB_BUCKET"),
            blob_token: non_empty_var("BLOB_TOKEN"),
            blob_dir: non_empty_var("BLOB_DIR").map(PathBuf::from),
            sessions_prefix: std::env::var("SESSIONS_PREFIX")
                .unwrap_or_else(|_| default_sessions_prefix()),
            local_session_dirs,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Campaign provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSettings {
    /// Price of one campaign period, in minor currency units.
    #[serde(default = "default_campaign_cost")]
    pub campaign_cost: i64,

    /// Length of one paid campaign period in days.
    #[serde(default = "default_campaign_days")]
    pub campaign_days: i64,

    /// Idle time after which an unfinished flow is swept.
    #[serde(default = "default_flow_ttl")]
    pub flow_ttl_secs: u64,

    /// Bounded wait for the status bot reply.
    #[serde(default = "default_spam_check_timeout")]
    pub spam_check_timeout_secs: u64,
}

fn default_campaign_cost() -> i64 {
    1000
}

fn default_campaign_days() -> i64 {
    7
}

fn default_flow_ttl() -> u64 {
    3600
}

fn default_spam_check_timeout() -> u64 {
    5
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            campaign_cost: default_campaign_cost(),
            campaign_days: default_campaign_days(),
            flow_ttl_secs: default_flow_ttl(),
            spam_check_timeout_secs: default_spam_check_timeout(),
        }
    }
}

impl ProvisionSettings {
    /// Creates provisioning settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            campaign_cost: positive_var("CAMPAIGN_COST").unwrap_or_else(default_campaign_cost),
            campaign_days: positive_var("CAMPAIGN_DAYS").unwrap_or_else(default_campaign_days),
            flow_ttl_secs: parsed_var("FLOW_TTL_SECS").unwrap_or_else(default_flow_ttl),
            spam_check_timeout_secs: parsed_var("SPAM_CHECK_TIMEOUT_SECS")
                .unwrap_or_else(default_spam_check_timeout),
        }
    }

    /// Idle TTL of a provisioning flow.
    #[must_use]
    pub const fn flow_ttl(&self) -> Duration {
        Duration::from_secs(self.flow_ttl_secs)
    }

    /// Bounded wait for the status bot reply.
    #[must_use]
    pub const fn spam_check_timeout(&self) -> Duration {
        Duration::from_secs(self.spam_check_timeout_secs)
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Reads an amount that must be above zero; anything else is ignored.
fn positive_var(key: &str) -> Option<i64> {
    parse_positive(std::env::var(key).ok().as_deref())
}

fn parse_positive(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok()).filter(|v: &i64| *v > 0)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be an integer)")]
    InvalidApiId,
}
