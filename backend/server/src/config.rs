use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use anyhow::{Result, anyhow, bail};
use tracing::{info, warn};

use crate::utils::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Redis,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            other => Err(format!("unknown store {other}")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub redis_url: String,
    pub root_name: String,
    pub retry: RetryPolicy,
    pub subscriber_buffer: usize,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            store: StoreKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            root_name: "admin".to_string(),
            retry: RetryPolicy::default(),
            subscriber_buffer: 64,
            cors_origin: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let retry = RetryPolicy {
            max_attempts: try_load("VOTE_RETRY_ATTEMPTS", "3")?,
            base_backoff: Duration::from_millis(try_load("VOTE_RETRY_BACKOFF_MS", "5")?),
        };

        if retry.max_attempts == 0 {
            bail!("VOTE_RETRY_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            store: try_load("CANTEEN_STORE", "memory")?,
            redis_url: redis_url(try_load("REDIS_URL", "redis://127.0.0.1:6379")?),
            root_name: try_load("ROOT_NAME", "admin")?,
            retry,
            subscriber_buffer: try_load("SUBSCRIBER_BUFFER", "64")?,
            cors_origin: optional("CORS_ORIGIN"),
        })
    }
}

/// Splices the optional `REDIS_PASSWORD` secret into the url.
fn redis_url(url: String) -> String {
    match read_secret("REDIS_PASSWORD") {
        Some(password) => url.replacen("redis://", &format!("redis://:{password}@"), 1),
        None => url,
    }
}

/// A setting with no default. Unset or blank means off.
fn optional(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let value = value.trim();

    if value.is_empty() {
        return None;
    }

    info!("{key} set to {value}");
    Some(value.to_string())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Environment misconfigured, {key}={raw}: {e}")
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("Secret {secret_name} not read: {e}");
        })
        .ok()
}
