//! Environment configuration.
//!
//! Every recognized option has a default except `DATABASE_URL`; the service
//! refuses to start without a durable store.

use std::time::Duration;
use thiserror::Error;

/// Configuration load failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable was not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable was set to an unparseable value.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Deployment environment; selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Human-readable logs, payment worker on by default.
    Development,
    /// JSON logs, payment worker off by default.
    Production,
}

/// Service configuration, loaded from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port (`PORT`, default 8080).
    pub port: u16,
    /// Deployment environment (`ENV`, default development).
    pub environment: Environment,
    /// Durable store connection string (`DATABASE_URL`, required).
    pub database_url: String,
    /// Inventory cache endpoint (`REDIS_ADDR`, default 127.0.0.1:6379).
    pub redis_addr: String,
    /// Inventory cache password (`REDIS_PASSWORD`, optional).
    pub redis_password: Option<String>,
    /// Inventory cache logical database (`REDIS_DB`, default 0).
    pub redis_db: i64,
    /// Broker list (`KAFKA_BROKERS`, comma-separated, default localhost:9092).
    pub kafka_brokers: String,
    /// Topic carrying every domain event (`KAFKA_TOPIC_ORDER_EVENTS`,
    /// default `order-events`).
    pub kafka_topic: String,
    /// Consumer group of the saga's payment-result loop
    /// (`KAFKA_CONSUMER_GROUP`, default `orderflow`).
    pub kafka_consumer_group: String,
    /// Reservation-phase budget (`ORDER_TIMEOUT_SECONDS`, default 30).
    pub order_timeout: Duration,
    /// Simulated provider latency cap for the mock payment worker
    /// (`PAYMENT_TIMEOUT_SECONDS`, default 30).
    pub payment_timeout: Duration,
    /// Trace collector endpoint (`JAEGER_ENDPOINT`, optional; consumed by
    /// the external tracing pipeline).
    pub jaeger_endpoint: Option<String>,
    /// Prometheus exporter port (`PROMETHEUS_PORT`, optional; exporter is
    /// disabled when unset).
    pub prometheus_port: Option<u16>,
    /// Whether to host the mock payment worker
    /// (`PAYMENT_WORKER_ENABLED`; defaults to on in development, off in
    /// production).
    pub payment_worker_enabled: bool,
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing `DATABASE_URL` or any
    /// unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match get("ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid { name: "ENV", value: other.to_string() });
            },
        };

        let payment_worker_enabled = match get("PAYMENT_WORKER_ENABLED").as_deref() {
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "PAYMENT_WORKER_ENABLED",
                    value: other.to_string(),
                });
            },
            None => environment == Environment::Development,
        };

        Ok(Self {
            port: parse_or(&get, "PORT", 8080)?,
            environment,
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            redis_addr: get("REDIS_ADDR").unwrap_or_else(|| "127.0.0.1:6379".to_string()),
            redis_password: get("REDIS_PASSWORD").filter(|p| !p.is_empty()),
            redis_db: parse_or(&get, "REDIS_DB", 0)?,
            kafka_brokers: get("KAFKA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            kafka_topic: get("KAFKA_TOPIC_ORDER_EVENTS")
                .unwrap_or_else(|| "order-events".to_string()),
            kafka_consumer_group: get("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|| "orderflow".to_string()),
            order_timeout: Duration::from_secs(parse_or(&get, "ORDER_TIMEOUT_SECONDS", 30)?),
            payment_timeout: Duration::from_secs(parse_or(&get, "PAYMENT_TIMEOUT_SECONDS", 30)?),
            jaeger_endpoint: get("JAEGER_ENDPOINT").filter(|e| !e.is_empty()),
            prometheus_port: get("PROMETHEUS_PORT")
                .map(|v| {
                    v.parse().map_err(|_| ConfigError::Invalid {
                        name: "PROMETHEUS_PORT",
                        value: v.clone(),
                    })
                })
                .transpose()?,
            payment_worker_enabled,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => {
            value.parse().map_err(|_| ConfigError::Invalid { name, value: value.clone() })
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/orderflow")]))
                .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.redis_addr, "127.0.0.1:6379");
        assert_eq!(config.kafka_topic, "order-events");
        assert_eq!(config.order_timeout, Duration::from_secs(30));
        assert!(config.payment_worker_enabled);
        assert_eq!(config.prometheus_port, None);
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(
            Config::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn production_defaults_disable_the_payment_worker() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/orderflow"),
            ("ENV", "production"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(!config.payment_worker_enabled);

        let overridden = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/orderflow"),
            ("ENV", "production"),
            ("PAYMENT_WORKER_ENABLED", "true"),
        ]))
        .unwrap();
        assert!(overridden.payment_worker_enabled);
    }

    #[test]
    fn invalid_values_are_rejected_with_context() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/orderflow"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid { name: "PORT", value: "not-a-port".to_string() });

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/orderflow"),
            ("ENV", "staging"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid { name: "ENV", value: "staging".to_string() });
    }
}
