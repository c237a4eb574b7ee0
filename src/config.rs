//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::BrokerConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; in-memory stores are used when unset
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Settlement broker worker tasks
    pub broker_workers: usize,

    /// Settlement queue capacity
    pub broker_queue_capacity: usize,

    /// Re-deliveries before a settlement event is dropped
    pub broker_max_retries: u32,

    pub broker_retry_base_delay: Duration,

    pub broker_retry_max_delay: Duration,

    /// How long shutdown waits for the settlement queue to drain
    pub shutdown_timeout: Duration,

    /// Directory invoice documents are written to
    pub attachment_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = parse_or(&lookup, "PORT", 3000)?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let broker_workers = parse_or(&lookup, "BROKER_WORKERS", 4)?;
        if broker_workers == 0 {
            return Err(ConfigError::InvalidValue("BROKER_WORKERS"));
        }
        let broker_queue_capacity = parse_or(&lookup, "BROKER_QUEUE_CAPACITY", 256)?;
        if broker_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("BROKER_QUEUE_CAPACITY"));
        }
        let broker_max_retries = parse_or(&lookup, "BROKER_MAX_RETRIES", 5)?;
        let broker_retry_base_delay =
            Duration::from_millis(parse_or(&lookup, "BROKER_RETRY_BASE_DELAY_MS", 50)?);
        let broker_retry_max_delay =
            Duration::from_millis(parse_or(&lookup, "BROKER_RETRY_MAX_DELAY_MS", 5000)?);

        let shutdown_timeout = Duration::from_secs(parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 5)?);

        let attachment_dir = lookup("ATTACHMENT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./attachments"));

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            broker_workers,
            broker_queue_capacity,
            broker_max_retries,
            broker_retry_base_delay,
            broker_retry_max_delay,
            shutdown_timeout,
            attachment_dir,
        })
    }

    /// Settlement broker settings
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            workers: self.broker_workers,
            queue_capacity: self.broker_queue_capacity,
            max_retries: self.broker_max_retries,
            retry_base_delay: self.broker_retry_base_delay,
            retry_max_delay: self.broker_retry_max_delay,
        }
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert!(config.database_url.is_none());
        assert_eq!(config.port, 3000);
        assert_eq!(config.broker_workers, 4);
        assert_eq!(config.broker_queue_capacity, 256);
        assert_eq!(config.broker_max_retries, 5);
        assert_eq!(config.broker_retry_base_delay, Duration::from_millis(50));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(!config.is_production());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/bids"),
            ("BROKER_WORKERS", "8"),
            ("BROKER_MAX_RETRIES", "0"),
            ("ENVIRONMENT", "production"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/bids"));
        assert_eq!(config.broker_config().workers, 8);
        assert_eq!(config.broker_config().max_retries, 0);
        assert!(config.is_production());
    }

    #[test]
    fn test_invalid_values() {
        let result = Config::from_lookup(lookup(&[("PORT", "http")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue("PORT"))));

        let result = Config::from_lookup(lookup(&[("BROKER_WORKERS", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue("BROKER_WORKERS"))));
    }
}
