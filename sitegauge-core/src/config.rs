// Runtime settings loaded from the environment (and an optional .env file)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DATABASE: &str = "~/.config/sitegauge/sitegauge.db";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_USER_AGENT: &str = "sitegauge/0.1 (+https://sitegauge.invalid/bot)";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind_addr: String,
    /// Shared secret expected in `x-webhook-secret` on webhook requests.
    pub webhook_secret: Option<String>,
    pub crawl_concurrency: usize,
    pub max_depth: usize,
    pub max_pages: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Resolve canonical and internal link statuses while ingesting.
    pub probe_links: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: expand_path(DEFAULT_DATABASE),
            bind_addr: DEFAULT_BIND.to_string(),
            webhook_secret: None,
            crawl_concurrency: 10,
            max_depth: 3,
            max_pages: 500,
            request_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            probe_links: false,
        }
    }
}

impl Settings {
    /// Load settings from `SITEGAUGE_*` environment variables, reading a
    /// `.env` file first when one is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            database_path: get("SITEGAUGE_DATABASE")
                .map(|p| expand_path(&p))
                .unwrap_or(defaults.database_path),
            bind_addr: get("SITEGAUGE_BIND").unwrap_or(defaults.bind_addr),
            webhook_secret: get("SITEGAUGE_WEBHOOK_SECRET"),
            crawl_concurrency: parse_or("SITEGAUGE_CRAWL_CONCURRENCY", get("SITEGAUGE_CRAWL_CONCURRENCY"), defaults.crawl_concurrency)?,
            max_depth: parse_or("SITEGAUGE_MAX_DEPTH", get("SITEGAUGE_MAX_DEPTH"), defaults.max_depth)?,
            max_pages: parse_or("SITEGAUGE_MAX_PAGES", get("SITEGAUGE_MAX_PAGES"), defaults.max_pages)?,
            request_timeout_secs: parse_or(
                "SITEGAUGE_REQUEST_TIMEOUT_SECS",
                get("SITEGAUGE_REQUEST_TIMEOUT_SECS"),
                defaults.request_timeout_secs,
            )?,
            user_agent: get("SITEGAUGE_USER_AGENT").unwrap_or(defaults.user_agent),
            probe_links: parse_or("SITEGAUGE_PROBE_LINKS", get("SITEGAUGE_PROBE_LINKS"), defaults.probe_links)?,
        })
    }

    /// The webhook server refuses to start without a secret.
    pub fn require_webhook_secret(&self) -> Result<&str, ConfigError> {
        self.webhook_secret
            .as_deref()
            .ok_or(ConfigError::Missing("SITEGAUGE_WEBHOOK_SECRET"))
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
