//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{Environment, SagaConfig};
use thiserror::Error;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// A recognized variable held a value that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3001`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `APP_ENV`: `development` or `production` (default: `production`)
/// - `BROKER_URL`: broker connection target (default: `"amqp://localhost:5672"`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used when unset
/// - `RPC_TIMEOUT_MS`: overrides the environment's inventory RPC timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub environment: Environment,
    pub broker_url: String,
    pub database_url: Option<String>,
    pub rpc_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError {
                var: "PORT",
                reason: format!("{e}"),
            })?,
            None => defaults.port,
        };

        let log_format = match var("LOG_FORMAT").as_deref().map(str::trim) {
            None => LogFormat::Pretty,
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(f) if f.eq_ignore_ascii_case("pretty") || f.eq_ignore_ascii_case("text") => {
                LogFormat::Pretty
            }
            Some(other) => {
                return Err(ConfigError {
                    var: "LOG_FORMAT",
                    reason: format!("expected 'pretty' or 'json', got '{other}'"),
                });
            }
        };

        let environment = match var("APP_ENV") {
            Some(raw) => raw.parse::<Environment>().map_err(|reason| ConfigError {
                var: "APP_ENV",
                reason,
            })?,
            None => defaults.environment,
        };

        let rpc_timeout = match var("RPC_TIMEOUT_MS") {
            Some(raw) => {
                let millis = raw.trim().parse::<u64>().map_err(|e| ConfigError {
                    var: "RPC_TIMEOUT_MS",
                    reason: format!("{e}"),
                })?;
                if millis == 0 {
                    return Err(ConfigError {
                        var: "RPC_TIMEOUT_MS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Some(Duration::from_millis(millis))
            }
            None => None,
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            environment,
            broker_url: var("BROKER_URL").unwrap_or(defaults.broker_url),
            database_url: var("DATABASE_URL"),
            rpc_timeout,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the saga tunables for this environment, applying the overrides.
    pub fn saga_config(&self) -> SagaConfig {
        let mut saga = SagaConfig::for_environment(self.environment);
        saga.broker_url = self.broker_url.clone();
        if let Some(timeout) = self.rpc_timeout {
            saga.rpc_timeout = timeout;
        }
        saga
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            environment: Environment::Production,
            broker_url: "amqp://localhost:5672".to_string(),
            database_url: None,
            rpc_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 3001);
        assert_eq!(config.environment, Environment::Production);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = load(&[("HOST", "127.0.0.1"), ("PORT", "8080")]).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = load(&[("PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "PORT");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("HOST", "  "), ("DATABASE_URL", "")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_log_format() {
        assert_eq!(
            load(&[("LOG_FORMAT", "JSON")]).unwrap().log_format,
            LogFormat::Json
        );
        assert_eq!(
            load(&[("LOG_FORMAT", "pretty")]).unwrap().log_format,
            LogFormat::Pretty
        );
        assert_eq!(load(&[("LOG_FORMAT", "xml")]).unwrap_err().var, "LOG_FORMAT");
    }

    #[test]
    fn test_development_profile_uses_longer_rpc_timeout() {
        let config = load(&[("APP_ENV", "development")]).unwrap();
        assert_eq!(config.saga_config().rpc_timeout, Duration::from_secs(30));

        let config = load(&[("APP_ENV", "production")]).unwrap();
        assert_eq!(config.saga_config().rpc_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        assert_eq!(load(&[("APP_ENV", "staging")]).unwrap_err().var, "APP_ENV");
    }

    #[test]
    fn test_rpc_timeout_override() {
        let config = load(&[("APP_ENV", "development"), ("RPC_TIMEOUT_MS", "1500")]).unwrap();
        assert_eq!(config.saga_config().rpc_timeout, Duration::from_millis(1500));
        assert_eq!(load(&[("RPC_TIMEOUT_MS", "0")]).unwrap_err().var, "RPC_TIMEOUT_MS");
    }

    #[test]
    fn test_saga_config_carries_broker_url() {
        let config = load(&[("BROKER_URL", "amqp://user:pw@rabbit:5672")]).unwrap();
        let saga = config.saga_config();
        assert_eq!(saga.broker_url, "amqp://user:pw@rabbit:5672");
        assert_eq!(saga.publish_timeout, Duration::from_secs(5));
        assert_eq!(saga.connection_config().url, "amqp://user:pw@rabbit:5672");
    }
}
