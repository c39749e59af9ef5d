//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The store URL may carry credentials and is kept in a
//! `secrecy::SecretString`.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::engine::{RetryPolicy, WorkerConfig};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub store_url: SecretString,
    pub queue_name: String,
    pub poll_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub task_timeout: Duration,
    pub connect_attempts: u32,
    pub otel_endpoint: Option<String>,
    pub service_name: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            store_url: SecretString::from(required_var("TASKQ_STORE_URL")?),
            queue_name: std::env::var("TASKQ_QUEUE").unwrap_or_else(|_| "tasks".to_string()),
            poll_timeout: Duration::from_secs(parsed_var("TASKQ_POLL_TIMEOUT_SECS", 5)?),
            heartbeat_interval: Duration::from_secs(parsed_var("TASKQ_HEARTBEAT_SECS", 30)?),
            task_timeout: Duration::from_secs(parsed_var("TASKQ_TASK_TIMEOUT_SECS", 30)?),
            connect_attempts: parsed_var("TASKQ_CONNECT_ATTEMPTS", 20)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "taskq".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // A zero timeout means "block forever" to BLPOP.
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("TASKQ_POLL_TIMEOUT_SECS must be at least 1".to_string()));
        }
        if self.task_timeout.is_zero() {
            return Err(Error::Config("TASKQ_TASK_TIMEOUT_SECS must be at least 1".to_string()));
        }
        if self.connect_attempts == 0 {
            return Err(Error::Config("TASKQ_CONNECT_ATTEMPTS must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_timeout: self.poll_timeout,
            heartbeat_interval: self.heartbeat_interval,
            task_timeout: self.task_timeout,
            ..WorkerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
