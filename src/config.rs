use crate::models::AccountId;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SYNC_START_DATE: &str = "2025-01-01";
const DEFAULT_CACHE_DIR: &str = "data/cache";
const DEFAULT_CACHE_TTL_HOURS: u64 = 24;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETENTION_DAYS: i64 = 365;
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct UpstreamCredentials {
    pub email: String,
    pub password: String,
}

/// All recognized configuration, parsed from the environment once at startup
/// and passed explicitly from there on.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub api_url: String,
    pub credentials: UpstreamCredentials,
    pub target_account_id: AccountId,
    pub sync_secret: Option<String>,
    pub sync_start_date: NaiveDate,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub retention_days: i64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_url = require_env("STATS_API_URL")?
            .trim_end_matches('/')
            .to_string();
        let email = require_env("STATS_API_EMAIL")?;
        let password = strip_quotes(&require_env("STATS_API_PASSWORD")?);
        let target_account_id = AccountId::new(require_env("TARGET_ACCOUNT_ID")?);
        if target_account_id.is_empty() {
            return Err(anyhow!("TARGET_ACCOUNT_ID must not be empty"));
        }

        Ok(Self {
            database_url: optional_env("DATABASE_URL"),
            api_url,
            credentials: UpstreamCredentials { email, password },
            target_account_id,
            sync_secret: optional_env("SYNC_SECRET"),
            sync_start_date: env_date("SYNC_START_DATE", DEFAULT_SYNC_START_DATE)?,
            cache_dir: optional_env("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            cache_ttl: Duration::from_secs(
                env_u64("CACHE_TTL_HOURS", DEFAULT_CACHE_TTL_HOURS)? * 3600,
            ),
            http_timeout: Duration::from_secs(env_u64(
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            retention_days: env_i64("RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?,
            port: env_u16("PORT", DEFAULT_PORT)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required environment variable {}", key))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_date(key: &str, default: &str) -> Result<NaiveDate> {
    let raw = optional_env(key).unwrap_or_else(|| default.to_string());
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "{} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match optional_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| anyhow!("{} must be a non-negative integer (value: {})", key, raw)),
        None => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match optional_env(key) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("{} must be an integer (value: {})", key, raw)),
        None => Ok(default),
    }
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
    match optional_env(key) {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|_| anyhow!("{} must be a port number (value: {})", key, raw)),
        None => Ok(default),
    }
}

/// Passwords pasted into env files sometimes keep their shell quoting.
/// Strip one matching pair of surrounding quotes.
fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}
