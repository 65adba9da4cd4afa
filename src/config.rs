//! Environment-driven configuration shared by all three processes
//! (gateway, workers, reconciler).

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL.
    pub redis_url: String,
    /// Address the HTTP gateway listens on.
    pub listen_addr: String,
    /// Retention window for job records; expiry is silent deletion.
    pub job_ttl: Duration,
    /// Claims older than this are presumed abandoned.
    pub stale_threshold: Duration,
    /// How often the reconciler sweeps.
    pub reconcile_interval: Duration,
    /// Total attempts per job (1 initial + retries).
    pub max_attempts: u32,
    /// Number of worker tasks per worker process.
    pub num_workers: usize,
    /// Fixed delay of the stub task executor.
    pub task_delay: Duration,
    /// How long a blocking dequeue waits before re-checking for shutdown.
    pub dequeue_timeout: Duration,
    /// Timeout for graceful worker shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            listen_addr: "0.0.0.0:5000".to_string(),
            job_ttl: Duration::from_secs(604_800), // 7 days
            stale_threshold: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(60),
            max_attempts: 4,
            num_workers: 4,
            task_delay: Duration::from_secs(2),
            dequeue_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
    /// - `LISTEN_ADDR`: gateway listen address (default: 0.0.0.0:5000)
    /// - `JOB_TTL_SECS`: record retention in seconds (default: 604800)
    /// - `STALE_THRESHOLD_SECS`: claim staleness threshold (default: 300)
    /// - `RECONCILER_INTERVAL_SECS`: sweep interval (default: 60)
    /// - `MAX_ATTEMPTS`: total attempts per job (default: 4)
    /// - `NUM_WORKERS`: worker tasks per process (default: 4)
    /// - `TASK_DELAY_SECS`: stub executor delay (default: 2)
    /// - `DEQUEUE_TIMEOUT_SECS`: blocking dequeue timeout (default: 5)
    /// - `SHUTDOWN_TIMEOUT_SECS`: graceful shutdown timeout (default: 30)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }

        if let Ok(val) = std::env::var("JOB_TTL_SECS") {
            config.job_ttl = Duration::from_secs(parse_env_value(&val, "JOB_TTL_SECS")?);
        }

        if let Ok(val) = std::env::var("STALE_THRESHOLD_SECS") {
            config.stale_threshold =
                Duration::from_secs(parse_env_value(&val, "STALE_THRESHOLD_SECS")?);
        }

        if let Ok(val) = std::env::var("RECONCILER_INTERVAL_SECS") {
            config.reconcile_interval =
                Duration::from_secs(parse_env_value(&val, "RECONCILER_INTERVAL_SECS")?);
        }

        if let Ok(val) = std::env::var("MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "NUM_WORKERS")?;
        }

        if let Ok(val) = std::env::var("TASK_DELAY_SECS") {
            config.task_delay = Duration::from_secs(parse_env_value(&val, "TASK_DELAY_SECS")?);
        }

        if let Ok(val) = std::env::var("DEQUEUE_TIMEOUT_SECS") {
            config.dequeue_timeout =
                Duration::from_secs(parse_env_value(&val, "DEQUEUE_TIMEOUT_SECS")?);
        }

        if let Ok(val) = std::env::var("SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout =
                Duration::from_secs(parse_env_value(&val, "SHUTDOWN_TIMEOUT_SECS")?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.listen_addr.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "listen_addr cannot be empty".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.job_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_ttl must be greater than 0".to_string(),
            ));
        }

        if self.stale_threshold.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "stale_threshold must be greater than 0".to_string(),
            ));
        }

        if self.reconcile_interval.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconcile_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.job_ttl, Duration::from_secs(604_800));
        assert_eq!(config.stale_threshold, Duration::from_secs(300));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.num_workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env_value::<u32>("42", "test").unwrap(), 42);
        assert_eq!(parse_env_value::<u64>("0", "test").unwrap(), 0);
        assert!(parse_env_value::<u32>("nope", "test").is_err());
        assert!(parse_env_value::<u32>("-1", "test").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_attempts() {
        let config = Config {
            max_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = Config {
            num_workers: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_redis_url() {
        let config = Config {
            redis_url: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_stale_threshold() {
        let config = Config {
            stale_threshold: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
