//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.
//! The resilience and recovery policies are plain structs built from it, so
//! tests can construct them directly.

use std::time::Duration;

use serde::Deserialize;

use crate::ledger::LedgerClientPolicy;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::services::compensation::CompensationPolicy;
use crate::services::recovery::RecoveryConfig;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string; in-memory store when unset
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `LEDGER_BASE_URL` (optional): Ledger service URL; sandbox ledger when unset
/// - `LEDGER_*`, `BREAKER_*`: Timeout, retry and circuit breaker tuning
/// - `RECOVERY_*`, `COMPENSATION_*`: Background recovery tuning
/// - `SAGA_DEADLINE_MS` (optional): Upper bound on one drive of a transfer
/// - `WEBHOOK_URL` / `WEBHOOK_SECRET` (optional): Signed event delivery
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub ledger_base_url: Option<String>,

    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,

    #[serde(default = "default_ledger_max_retries")]
    pub ledger_max_retries: usize,

    #[serde(default = "default_ledger_backoff_min_ms")]
    pub ledger_backoff_min_ms: u64,

    #[serde(default = "default_ledger_backoff_max_ms")]
    pub ledger_backoff_max_ms: u64,

    #[serde(default = "default_breaker_window_size")]
    pub breaker_window_size: usize,

    #[serde(default = "default_breaker_minimum_calls")]
    pub breaker_minimum_calls: usize,

    #[serde(default = "default_breaker_failure_rate")]
    pub breaker_failure_rate: f64,

    #[serde(default = "default_breaker_slow_call_rate")]
    pub breaker_slow_call_rate: f64,

    #[serde(default = "default_breaker_slow_call_ms")]
    pub breaker_slow_call_ms: u64,

    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    #[serde(default = "default_breaker_half_open_calls")]
    pub breaker_half_open_calls: u32,

    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    #[serde(default = "default_recovery_stale_after_secs")]
    pub recovery_stale_after_secs: u64,

    #[serde(default = "default_recovery_batch_size")]
    pub recovery_batch_size: i64,

    #[serde(default = "default_recovery_concurrency")]
    pub recovery_concurrency: usize,

    #[serde(default = "default_compensation_max_attempts_per_run")]
    pub compensation_max_attempts_per_run: usize,

    #[serde(default = "default_compensation_alert_after")]
    pub compensation_alert_after: i32,

    #[serde(default = "default_compensation_backoff_min_ms")]
    pub compensation_backoff_min_ms: u64,

    #[serde(default = "default_compensation_backoff_max_ms")]
    pub compensation_backoff_max_ms: u64,

    pub saga_deadline_ms: Option<u64>,

    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_ledger_timeout_ms() -> u64 {
    2000
}

fn default_ledger_max_retries() -> usize {
    3
}

fn default_ledger_backoff_min_ms() -> u64 {
    100
}

fn default_ledger_backoff_max_ms() -> u64 {
    2000
}

fn default_breaker_window_size() -> usize {
    20
}

fn default_breaker_minimum_calls() -> usize {
    10
}

fn default_breaker_failure_rate() -> f64 {
    0.5
}

fn default_breaker_slow_call_rate() -> f64 {
    0.8
}

fn default_breaker_slow_call_ms() -> u64 {
    1500
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

fn default_breaker_half_open_calls() -> u32 {
    3
}

fn default_recovery_interval_secs() -> u64 {
    30
}

fn default_recovery_stale_after_secs() -> u64 {
    60
}

fn default_recovery_batch_size() -> i64 {
    100
}

fn default_recovery_concurrency() -> usize {
    8
}

fn default_compensation_max_attempts_per_run() -> usize {
    5
}

fn default_compensation_alert_after() -> i32 {
    10
}

fn default_compensation_backoff_min_ms() -> u64 {
    200
}

fn default_compensation_backoff_max_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variable values cannot be parsed into
    /// expected types.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    pub fn ledger_client_policy(&self) -> LedgerClientPolicy {
        LedgerClientPolicy {
            timeout: Duration::from_millis(self.ledger_timeout_ms),
            retry: RetryPolicy {
                max_retries: self.ledger_max_retries,
                min_delay: Duration::from_millis(self.ledger_backoff_min_ms),
                max_delay: Duration::from_millis(self.ledger_backoff_max_ms),
                jitter: true,
            },
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: self.breaker_window_size,
            minimum_calls: self.breaker_minimum_calls,
            failure_rate_threshold: self.breaker_failure_rate,
            slow_call_rate_threshold: self.breaker_slow_call_rate,
            slow_call_duration: Duration::from_millis(self.breaker_slow_call_ms),
            open_cooldown: Duration::from_millis(self.breaker_cooldown_ms),
            half_open_max_calls: self.breaker_half_open_calls,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            interval: Duration::from_secs(self.recovery_interval_secs),
            stale_after: Duration::from_secs(self.recovery_stale_after_secs),
            batch_size: self.recovery_batch_size,
            concurrency: self.recovery_concurrency,
        }
    }

    pub fn compensation_policy(&self) -> CompensationPolicy {
        CompensationPolicy {
            max_attempts_per_run: self.compensation_max_attempts_per_run,
            alert_after_attempts: self.compensation_alert_after,
            min_delay: Duration::from_millis(self.compensation_backoff_min_ms),
            max_delay: Duration::from_millis(self.compensation_backoff_max_ms),
        }
    }

    pub fn saga_deadline(&self) -> Option<Duration> {
        self.saga_deadline_ms.map(Duration::from_millis)
    }

    /// Webhook URL and secret, when both are set.
    pub fn webhook(&self) -> Option<(&str, &str)> {
        match (&self.webhook_url, &self.webhook_secret) {
            (Some(url), Some(secret)) => Some((url.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_match_built_in_policies() {
        let config = from_pairs(&[]);

        assert_eq!(config.server_port, 3000);
        assert!(config.database_url.is_none());
        assert!(config.ledger_base_url.is_none());
        assert_eq!(config.breaker_config(), CircuitBreakerConfig::default());
        assert_eq!(config.recovery_config(), RecoveryConfig::default());
        assert_eq!(config.compensation_policy(), CompensationPolicy::default());
        assert_eq!(config.ledger_client_policy(), LedgerClientPolicy::default());
        assert_eq!(config.saga_deadline(), None);
        assert!(config.webhook().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SERVER_PORT", "8080"),
            ("LEDGER_BASE_URL", "http://ledger:9000"),
            ("LEDGER_MAX_RETRIES", "5"),
            ("BREAKER_FAILURE_RATE", "0.25"),
            ("SAGA_DEADLINE_MS", "750"),
            ("WEBHOOK_URL", "https://hooks.example.com/t"),
        ]);

        assert_eq!(config.server_port, 8080);
        assert_eq!(config.ledger_base_url.as_deref(), Some("http://ledger:9000"));
        assert_eq!(config.ledger_client_policy().retry.max_retries, 5);
        assert_eq!(config.breaker_config().failure_rate_threshold, 0.25);
        assert_eq!(config.saga_deadline(), Some(Duration::from_millis(750)));
        // URL without a secret does not enable the webhook sink
        assert!(config.webhook().is_none());
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let result = envy::from_iter::<_, Config>(vec![(
            "SERVER_PORT".to_string(),
            "not-a-port".to_string(),
        )]);
        assert!(result.is_err());
    }
}
