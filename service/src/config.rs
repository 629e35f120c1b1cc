//! Configuration management for the order pipeline binaries.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is read first when present.

use order_pipeline_runtime::RedeliveryPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Deployment environment label (`APP_ENV`, default `development`)
    pub app_env: String,
    /// `RabbitMQ` configuration
    pub broker: BrokerConfig,
    /// `PostgreSQL` configuration
    pub database: DatabaseConfig,
    /// Consumer loop configuration
    pub consumer: ConsumerConfig,
    /// Prometheus exporter address; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
}

/// `RabbitMQ` configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    /// AMQP connection URL
    pub url: String,
    /// Exchange the order queue is bound to
    pub exchange: String,
    /// Order queue, also the routing key
    pub queue: String,
    /// Publish confirmation timeout in milliseconds
    pub publish_timeout_ms: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    pub connect_timeout: u64,
}

/// Consumer loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Failed attempts before dead-lettering (0 = requeue forever)
    pub max_attempts: u32,
    /// Wait before resubscribing after the stream ends, in milliseconds
    pub retry_delay_ms: u64,
}

impl Config {
    /// Load configuration from the process environment, after `.env`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric or address variable is
    /// set to something that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric or address variable does
    /// not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        // Credentials are percent-encoded so `@`, `:` and `/` survive in the URL.
        let credential = |key: &str, default: &str| urlencoding::encode(&var(key, default)).into_owned();

        let broker_url = match lookup("RABBITMQ_URL") {
            Some(url) => url,
            None => format!(
                "amqp://{}:{}@{}:{}/%2f",
                credential("RABBITMQ_USER", "guest"),
                credential("RABBITMQ_PASSWORD", "guest"),
                var("RABBITMQ_HOST", "localhost"),
                parse::<u16>(&lookup, "RABBITMQ_PORT")?.unwrap_or(5672),
            ),
        };

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                credential("DB_USER", "postgres"),
                credential("DB_PASSWORD", "postgres"),
                var("DB_HOST", "localhost"),
                parse::<u16>(&lookup, "DB_PORT")?.unwrap_or(5432),
                var("DB_NAME", "btg_orders"),
                var("DB_SSL_MODE", "disable"),
            ),
        };

        Ok(Self {
            app_env: var("APP_ENV", "development"),
            broker: BrokerConfig {
                url: broker_url,
                exchange: var("RABBITMQ_EXCHANGE", "orders_exchange"),
                queue: var("RABBITMQ_QUEUE", "orders"),
                publish_timeout_ms: parse(&lookup, "RABBITMQ_PUBLISH_TIMEOUT_MS")?.unwrap_or(5000),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS")?.unwrap_or(10),
                connect_timeout: parse(&lookup, "DATABASE_CONNECT_TIMEOUT")?.unwrap_or(30),
            },
            consumer: ConsumerConfig {
                max_attempts: parse(&lookup, "CONSUMER_MAX_ATTEMPTS")?.unwrap_or(5),
                retry_delay_ms: parse(&lookup, "CONSUMER_RETRY_DELAY_MS")?.unwrap_or(5000),
            },
            metrics_addr: parse(&lookup, "METRICS_ADDR")?,
        })
    }

    /// Redelivery policy for the consumer loop.
    #[must_use]
    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy::builder()
            .max_attempts(self.consumer.max_attempts)
            .build()
    }

    /// Wait before resubscribing.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.consumer.retry_delay_ms)
    }

    /// Publish confirmation timeout.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.publish_timeout_ms)
    }

    /// Database connection acquire timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout)
    }
}

/// Parse `key` if set. Empty values count as unset.
fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}
