//! Configuration types, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::ingest::fanout::{DEFAULT_BODY_LIMIT, DEFAULT_FANOUT_TIMEOUT};
use crate::retention::{DEFAULT_MAX_AGE, DEFAULT_SWEEP_INTERVAL};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    pub port: u16,
    /// Shared secret expected in `x-webhook-secret` on ingestion. Unchecked when unset.
    pub webhook_secret: Option<SecretString>,
    /// Required as `admin_token` on `admin_*` client actions. Admin actions
    /// are refused while unset.
    pub admin_token: Option<SecretString>,
    /// Domains offered while none are registered in the store.
    pub fallback_domains: Vec<String>,
    pub retention_max_age: Duration,
    pub sweep_interval: Duration,
    pub fanout_timeout: Duration,
    /// Characters of body text sent to webhooks.
    pub fanout_body_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/tempmail.db"),
            port: 8080,
            webhook_secret: None,
            admin_token: None,
            fallback_domains: Vec::new(),
            retention_max_age: DEFAULT_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
            fanout_body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl AppConfig {
    /// Read from process environment variables, defaulting anything unset
    /// or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            db_path: get("TEMPMAIL_DB_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            port: get("TEMPMAIL_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            webhook_secret: get("WEBHOOK_SECRET")
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            admin_token: get("ADMIN_TOKEN")
                .filter(|s| !s.trim().is_empty())
                .map(SecretString::from),
            fallback_domains: split_list(get("MAIL_DOMAINS").as_deref().unwrap_or_default()),
            retention_max_age: parsed("TEMPMAIL_RETENTION_HOURS")
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.retention_max_age),
            sweep_interval: parsed("TEMPMAIL_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            fanout_timeout: parsed("TEMPMAIL_FANOUT_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.fanout_timeout),
            fanout_body_limit: parsed("TEMPMAIL_FANOUT_BODY_LIMIT")
                .map(|n| n as usize)
                .unwrap_or(defaults.fanout_body_limit),
        }
    }
}

/// Mail-edge forwarder configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Ingestion webhook endpoint.
    pub webhook_url: String,
    pub webhook_secret: Option<SecretString>,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<SecretString>,
    pub request_timeout: Duration,
}

impl EdgeConfig {
    /// Read from process environment variables. `WEBHOOK_URL` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let webhook_url = get("WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("WEBHOOK_URL".into()))?;

        if !(webhook_url.starts_with("http://") || webhook_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "WEBHOOK_URL".into(),
                message: format!("expected an http(s) URL, got {webhook_url}"),
            });
        }

        Ok(Self {
            webhook_url,
            webhook_secret: get("WEBHOOK_SECRET")
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            bearer_token: get("WEBHOOK_BEARER_TOKEN")
                .or_else(|| get("SUPABASE_ANON_KEY"))
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            request_timeout: get("WEBHOOK_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30)),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
