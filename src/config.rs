//! Runtime configuration from the environment (and `.env`, loaded in `main`).

use crate::sources::retry::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Settings shared by every command. CLI flags override these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    pub db_path: PathBuf,
    pub batch_size: usize,
    pub page_size: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub retry_attempts: u32,
    pub shutdown_grace: Duration,
    pub store_raw: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            db_path: crate::default_db_path(),
            batch_size: 100,
            page_size: 100,
            retry_base: Duration::from_millis(1000),
            retry_max: Duration::from_millis(60_000),
            retry_attempts: 5,
            shutdown_grace: Duration::from_secs(10),
            store_raw: true,
        }
    }
}

impl ArchiverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: dotenvy::var("ARCHIVER_DB")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            batch_size: env_positive("ARCHIVER_BATCH_SIZE", defaults.batch_size),
            page_size: env_positive("ARCHIVER_PAGE_SIZE", defaults.page_size),
            retry_base: Duration::from_millis(env_parse(
                "ARCHIVER_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )),
            retry_max: Duration::from_millis(env_parse(
                "ARCHIVER_RETRY_MAX_MS",
                defaults.retry_max.as_millis() as u64,
            )),
            retry_attempts: env_parse("ARCHIVER_RETRY_ATTEMPTS", defaults.retry_attempts),
            shutdown_grace: Duration::from_secs(env_parse(
                "ARCHIVER_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
            store_raw: env_flag("ARCHIVER_STORE_RAW", defaults.store_raw),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: self.retry_base,
            max_delay: self.retry_max.max(self.retry_base),
            max_attempts: self.retry_attempts,
        }
    }
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match dotenvy::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_positive(key: &str, default: usize) -> usize {
    match env_parse(key, default) {
        0 => {
            warn!(key, default, "value must be positive, using default");
            default
        }
        n => n,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match dotenvy::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(key, value = %raw, default, "invalid flag, using default");
                default
            }
        },
        Err(_) => default,
    }
}
