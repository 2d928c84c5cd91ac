//! Application configuration management

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::jobs::scheduler::SchedulerConfig;
use crate::services::engine::EngineConfig;
use crate::services::health::HealthConfig;
use crate::services::logging::LogFormat;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,

    /// Maximum pool size
    pub database_max_connections: u32,

    /// Base64 AES-256 key used to decrypt stored API keys
    pub encryption_key: String,

    /// Seconds between health sweeps over all instances
    pub health_check_interval_secs: u64,

    /// Consecutive successful probes required before paused queues resume
    pub health_recovery_threshold: u32,

    /// Lease lifetime for a running queue; also bounds a stuck `in_progress`
    pub queue_lease_timeout_mins: u64,

    /// Cooldown window for queues in flat mode without an explicit value
    pub default_cooldown_hours: f64,

    /// Records requested per wanted page
    pub wanted_page_size: u32,

    /// Upper bound on wanted pages fetched per run
    pub max_wanted_pages: u32,

    /// Timeout for outbound HTTP calls
    pub http_timeout_secs: u64,

    /// Optional webhook that receives notification events as JSON
    pub notify_webhook_url: Option<String>,

    /// Console log format
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let encryption_key =
            env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY is required (base64, 32 bytes)")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/seeker.db?mode=rwc".to_string()),

            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,

            encryption_key,

            health_check_interval_secs: parse_var("HEALTH_CHECK_INTERVAL_SECS", 300)?,

            health_recovery_threshold: parse_var("HEALTH_RECOVERY_THRESHOLD", 3)?,

            queue_lease_timeout_mins: parse_var("QUEUE_LEASE_TIMEOUT_MINS", 120)?,

            default_cooldown_hours: parse_var("DEFAULT_COOLDOWN_HOURS", 24.0)?,

            wanted_page_size: parse_var("WANTED_PAGE_SIZE", 50)?,

            max_wanted_pages: parse_var("MAX_WANTED_PAGES", 20)?,

            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", 30)?,

            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            log_format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::from_name(&v))
                .unwrap_or_default(),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.wanted_page_size,
            max_pages: self.max_wanted_pages,
            default_cooldown_hours: self.default_cooldown_hours,
            lease_ttl: Duration::from_secs(self.queue_lease_timeout_mins * 60),
            ..EngineConfig::default()
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            recovery_threshold: self.health_recovery_threshold.max(1),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs.max(1)),
            ..SchedulerConfig::default()
        }
    }
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("SEEKER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("SEEKER_TEST_GARBAGE_VARIABLE", "not-a-number") };
        let result: Result<u32> = parse_var("SEEKER_TEST_GARBAGE_VARIABLE", 1);
        assert!(result.is_err());
        unsafe { env::remove_var("SEEKER_TEST_GARBAGE_VARIABLE") };
    }
}
