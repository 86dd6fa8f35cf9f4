//! Orchestrator configuration.
//!
//! This module provides configuration options for the processing queue and
//! pipeline orchestrator, including scheduler cadence, worker dispatch
//! timeouts, retry policy, health-monitor thresholds, and storage settings.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the queue processor and pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Storage settings
    /// PostgreSQL database connection URL.
    pub database_url: String,

    // HTTP settings
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Externally reachable base URL of this service, used to build the
    /// callback URL handed to workers.
    pub public_base_url: String,

    // Scheduler settings
    /// Interval between queue polling ticks.
    pub poll_interval: Duration,
    /// Maximum number of tasks this instance runs concurrently.
    pub max_concurrent_tasks: usize,
    /// Maximum retry attempts for transient failures before a task is
    /// terminally failed.
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff_base: Duration,
    /// Upper bound on a single retry backoff delay.
    pub retry_backoff_cap: Duration,

    // Worker dispatch settings
    /// Timeout for a single pipeline phase, covering both the dispatch call
    /// and the wait for an asynchronous callback result.
    pub phase_timeout: Duration,
    /// Connect/request timeout for the dispatch HTTP call itself.
    pub dispatch_timeout: Duration,
    /// Heartbeats older than this exclude a worker from dispatch.
    pub worker_heartbeat_timeout: Duration,

    // Health monitor settings
    /// Interval between health monitor sweeps.
    pub monitor_interval: Duration,
    /// Tasks `processing` longer than this are considered stuck.
    pub stuck_threshold: Duration,
    /// Automatic stuck resets allowed before a task is failed outright.
    pub stuck_max_auto_retries: u32,
    /// Corrected-task count above which a dependent-service restart is
    /// triggered.
    pub restart_threshold: usize,
    /// Idle-in-transaction connections older than this are flagged.
    pub idle_tx_soft_threshold: Duration,
    /// Idle-in-transaction connections older than this are terminated.
    pub idle_tx_hard_threshold: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            // Storage defaults
            database_url: "postgres://localhost/deckflow".to_string(),

            // HTTP defaults
            bind_addr: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),

            // Scheduler defaults
            poll_interval: Duration::from_secs(3),
            max_concurrent_tasks: 4,
            max_retries: 5,
            retry_backoff_base: Duration::from_secs(30),
            retry_backoff_cap: Duration::from_secs(900), // 15 minutes

            // Dispatch defaults
            phase_timeout: Duration::from_secs(600), // 10 minutes per phase
            dispatch_timeout: Duration::from_secs(30),
            worker_heartbeat_timeout: Duration::from_secs(120),

            // Monitor defaults
            monitor_interval: Duration::from_secs(300), // 5 minutes
            stuck_threshold: Duration::from_secs(1800), // 30 minutes
            stuck_max_auto_retries: 3,
            restart_threshold: 10,
            idle_tx_soft_threshold: Duration::from_secs(60),
            idle_tx_hard_threshold: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `DECKFLOW_BIND_ADDR`: HTTP bind address (default: 0.0.0.0:8080)
    /// - `DECKFLOW_PUBLIC_BASE_URL`: externally reachable base URL
    /// - `DECKFLOW_POLL_INTERVAL_SECS`: scheduler tick interval (default: 3)
    /// - `DECKFLOW_MAX_CONCURRENT_TASKS`: concurrent tasks (default: 4)
    /// - `DECKFLOW_MAX_RETRIES`: transient retry budget (default: 5)
    /// - `DECKFLOW_RETRY_BACKOFF_BASE_SECS`: backoff base (default: 30)
    /// - `DECKFLOW_RETRY_BACKOFF_CAP_SECS`: backoff cap (default: 900)
    /// - `DECKFLOW_PHASE_TIMEOUT_SECS`: per-phase timeout (default: 600)
    /// - `DECKFLOW_DISPATCH_TIMEOUT_SECS`: dispatch HTTP timeout (default: 30)
    /// - `DECKFLOW_WORKER_HEARTBEAT_TIMEOUT_SECS`: worker staleness (default: 120)
    /// - `DECKFLOW_MONITOR_INTERVAL_SECS`: monitor period (default: 300)
    /// - `DECKFLOW_STUCK_THRESHOLD_SECS`: stuck-task threshold (default: 1800)
    /// - `DECKFLOW_STUCK_MAX_AUTO_RETRIES`: auto resets before failing (default: 3)
    /// - `DECKFLOW_RESTART_THRESHOLD`: cleanup count triggering restart (default: 10)
    /// - `DECKFLOW_IDLE_TX_SOFT_SECS`: idle-transaction flag threshold (default: 60)
    /// - `DECKFLOW_IDLE_TX_HARD_SECS`: idle-transaction kill threshold (default: 300)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or a variable has
    /// an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        if let Ok(val) = std::env::var("DECKFLOW_BIND_ADDR") {
            config.bind_addr = val;
        }

        if let Ok(val) = std::env::var("DECKFLOW_PUBLIC_BASE_URL") {
            config.public_base_url = val.trim_end_matches('/').to_string();
        }

        if let Ok(val) = std::env::var("DECKFLOW_POLL_INTERVAL_SECS") {
            config.poll_interval = parse_env_secs(&val, "DECKFLOW_POLL_INTERVAL_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_MAX_CONCURRENT_TASKS") {
            config.max_concurrent_tasks = parse_env_value(&val, "DECKFLOW_MAX_CONCURRENT_TASKS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "DECKFLOW_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_RETRY_BACKOFF_BASE_SECS") {
            config.retry_backoff_base = parse_env_secs(&val, "DECKFLOW_RETRY_BACKOFF_BASE_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_RETRY_BACKOFF_CAP_SECS") {
            config.retry_backoff_cap = parse_env_secs(&val, "DECKFLOW_RETRY_BACKOFF_CAP_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_PHASE_TIMEOUT_SECS") {
            config.phase_timeout = parse_env_secs(&val, "DECKFLOW_PHASE_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_DISPATCH_TIMEOUT_SECS") {
            config.dispatch_timeout = parse_env_secs(&val, "DECKFLOW_DISPATCH_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_WORKER_HEARTBEAT_TIMEOUT_SECS") {
            config.worker_heartbeat_timeout =
                parse_env_secs(&val, "DECKFLOW_WORKER_HEARTBEAT_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_MONITOR_INTERVAL_SECS") {
            config.monitor_interval = parse_env_secs(&val, "DECKFLOW_MONITOR_INTERVAL_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_STUCK_THRESHOLD_SECS") {
            config.stuck_threshold = parse_env_secs(&val, "DECKFLOW_STUCK_THRESHOLD_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_STUCK_MAX_AUTO_RETRIES") {
            config.stuck_max_auto_retries =
                parse_env_value(&val, "DECKFLOW_STUCK_MAX_AUTO_RETRIES")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_RESTART_THRESHOLD") {
            config.restart_threshold = parse_env_value(&val, "DECKFLOW_RESTART_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_IDLE_TX_SOFT_SECS") {
            config.idle_tx_soft_threshold = parse_env_secs(&val, "DECKFLOW_IDLE_TX_SOFT_SECS")?;
        }

        if let Ok(val) = std::env::var("DECKFLOW_IDLE_TX_HARD_SECS") {
            config.idle_tx_hard_threshold = parse_env_secs(&val, "DECKFLOW_IDLE_TX_HARD_SECS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url must not be empty".to_string(),
            ));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be non-zero".to_string(),
            ));
        }

        if self.retry_backoff_base > self.retry_backoff_cap {
            return Err(ConfigError::ValidationFailed(format!(
                "retry_backoff_base ({:?}) must not exceed retry_backoff_cap ({:?})",
                self.retry_backoff_base, self.retry_backoff_cap
            )));
        }

        if self.idle_tx_soft_threshold > self.idle_tx_hard_threshold {
            return Err(ConfigError::ValidationFailed(format!(
                "idle_tx_soft_threshold ({:?}) must not exceed idle_tx_hard_threshold ({:?})",
                self.idle_tx_soft_threshold, self.idle_tx_hard_threshold
            )));
        }

        Ok(())
    }

    /// Callback URL workers post phase results to.
    pub fn callback_url(&self) -> String {
        format!("{}/worker/callback", self.public_base_url)
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}

/// Parses an environment variable holding whole seconds into a `Duration`.
fn parse_env_secs(val: &str, key: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env_value(val, key)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.stuck_threshold, Duration::from_secs(1800));
        assert_eq!(config.restart_threshold, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_callback_url() {
        let mut config = OrchestratorConfig::default();
        config.public_base_url = "https://deckflow.example.com".to_string();

        assert_eq!(
            config.callback_url(),
            "https://deckflow.example.com/worker/callback"
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrent_tasks = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = OrchestratorConfig::default();
        config.retry_backoff_base = Duration::from_secs(1000);
        config.retry_backoff_cap = Duration::from_secs(100);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_idle_thresholds() {
        let mut config = OrchestratorConfig::default();
        config.idle_tx_soft_threshold = Duration::from_secs(600);
        config.idle_tx_hard_threshold = Duration::from_secs(60);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_value_invalid() {
        let result: Result<u64, _> = parse_env_value("not-a-number", "TEST_KEY");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("TEST_KEY"));
    }

    #[test]
    fn test_parse_env_secs() {
        let parsed = parse_env_secs("90", "TEST_KEY").unwrap();
        assert_eq!(parsed, Duration::from_secs(90));
    }
}
