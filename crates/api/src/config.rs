//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{ActivityTimeouts, DispatcherConfig, RetryPolicy};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server and engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8081`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: Postgres event store; in-memory when unset
/// - `WORKER_COUNT`: concurrent reorder workers (default: `4`)
/// - `MAX_ABORTED_RUNS`: times an interrupted run is queued again before the
///   instance is failed (default: `5`)
/// - `RETRY_INITIAL_INTERVAL_MS`, `RETRY_BACKOFF_MULTIPLIER`,
///   `RETRY_MAX_INTERVAL_MS`, `RETRY_MAX_ATTEMPTS`: activity retry policy
/// - `ACTIVITY_TIMEOUT_MS`: per-call activity timeout (default: `30000`)
/// - `RULES_APPROVE_UNMATCHED`: approve requests with no reorder rule
///   (default: `true`)
/// - `SUPPLIER_LEAD_TIME_DAYS`: estimated delivery offset reported by the
///   built-in supplier (default: `7`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub worker_count: usize,
    pub max_aborted_runs: u32,
    pub retry: RetryPolicy,
    pub activity_timeout_ms: u64,
    pub approve_unmatched_rules: bool,
    pub supplier_lead_time_days: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retry = RetryPolicy {
            initial_interval_ms: parse_or(
                parsed("RETRY_INITIAL_INTERVAL_MS"),
                defaults.retry.initial_interval_ms,
            ),
            backoff_multiplier: parsed("RETRY_BACKOFF_MULTIPLIER")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(defaults.retry.backoff_multiplier),
            max_interval_ms: parse_or(
                parsed("RETRY_MAX_INTERVAL_MS"),
                defaults.retry.max_interval_ms,
            ),
            max_attempts: parse_or(parsed("RETRY_MAX_ATTEMPTS"), defaults.retry.max_attempts)
                .max(1),
        };

        Self {
            host: parsed("HOST").unwrap_or(defaults.host),
            port: parse_or(parsed("PORT"), defaults.port),
            log_level: parsed("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_or(parsed("LOG_FORMAT"), defaults.log_format),
            database_url: parsed("DATABASE_URL"),
            worker_count: parse_or(parsed("WORKER_COUNT"), defaults.worker_count).max(1),
            max_aborted_runs: parse_or(parsed("MAX_ABORTED_RUNS"), defaults.max_aborted_runs),
            retry,
            activity_timeout_ms: parse_or(
                parsed("ACTIVITY_TIMEOUT_MS"),
                defaults.activity_timeout_ms,
            ),
            approve_unmatched_rules: parse_or(
                parsed("RULES_APPROVE_UNMATCHED"),
                defaults.approve_unmatched_rules,
            ),
            supplier_lead_time_days: parse_or(
                parsed("SUPPLIER_LEAD_TIME_DAYS"),
                defaults.supplier_lead_time_days,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    pub fn activity_timeouts(&self) -> ActivityTimeouts {
        ActivityTimeouts::uniform(Duration::from_millis(self.activity_timeout_ms))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_count,
            max_aborted_runs: self.max_aborted_runs,
            ..DispatcherConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            worker_count: DispatcherConfig::default().worker_count,
            max_aborted_runs: DispatcherConfig::default().max_aborted_runs,
            retry: RetryPolicy::default(),
            activity_timeout_ms: 30_000,
            approve_unmatched_rules: true,
            supplier_lead_time_days: 7,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
