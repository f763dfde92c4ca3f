//! Saga tunables.

use std::str::FromStr;
use std::time::Duration;

use broker::{CircuitBreakerConfig, ConnectionConfig, PublisherConfig};

/// Deployment profile, used to pick the inventory RPC timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Every tunable of the order saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub broker_url: String,
    /// Timeout for the `check_availability` request/reply.
    pub rpc_timeout: Duration,
    pub publish_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    /// How long a new order may stay PENDING before the sweep fails it.
    pub order_validity: Duration,
    pub outbox_max_attempts: u32,
    pub outbox_batch_size: usize,
    pub outbox_interval: Duration,
    pub sweep_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

impl SagaConfig {
    pub fn for_environment(environment: Environment) -> Self {
        let rpc_timeout = match environment {
            Environment::Development => Duration::from_secs(30),
            Environment::Production => Duration::from_secs(5),
        };

        Self {
            broker_url: "amqp://localhost:5672".to_string(),
            rpc_timeout,
            publish_timeout: Duration::from_secs(5),
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
            order_validity: Duration::from_secs(5 * 60),
            outbox_max_attempts: 3,
            outbox_batch_size: 10,
            outbox_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.broker_url.clone(),
            reconnect_delay: self.reconnect_delay,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            timeout: self.publish_timeout,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: self.circuit_cooldown,
        }
    }

    /// Validity window as a calendar duration for timestamp arithmetic.
    pub fn order_validity_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.order_validity).unwrap_or(chrono::Duration::MAX)
    }
}
