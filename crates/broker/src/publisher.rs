use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, ConnectionManager, PublishError,
};

/// Publisher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Upper bound on a single publish call.
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Publishes fire-and-forget events through the managed connection.
///
/// The publisher owns its circuit breaker; nothing else records successes or
/// failures against it.
pub struct EventPublisher {
    connection: ConnectionManager,
    breaker: CircuitBreaker,
    config: PublisherConfig,
}

impl EventPublisher {
    pub fn new(
        connection: ConnectionManager,
        config: PublisherConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            connection,
            breaker: CircuitBreaker::new(breaker),
            config,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    /// Publishes `payload` under `event`.
    ///
    /// Fails without touching the network when the broker is disconnected or
    /// the circuit is open. Every other failure, including a timeout, counts
    /// against the breaker and is returned so the caller can fall back.
    #[tracing::instrument(skip(self, payload))]
    pub async fn publish(&self, event: &str, payload: &Value) -> Result<(), PublishError> {
        if !self.connection.is_connected() {
            debug!("Skipping publish, broker not connected");
            return Err(PublishError::NotConnected);
        }
        if self.breaker.is_open() {
            debug!("Skipping publish, circuit open");
            return Err(PublishError::CircuitOpen);
        }

        let emit = self.connection.transport().emit(event, payload);
        let result = match tokio::time::timeout(self.config.timeout, emit).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Transport(e)),
            Err(_) => Err(PublishError::Timeout(self.config.timeout)),
        };

        match &result {
            Ok(()) => {
                self.breaker.record_success();
                metrics::counter!("events_published_total", "event" => event.to_string())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!("event_publish_failures_total", "event" => event.to_string())
                    .increment(1);
                error!(error = %e, "Failed to publish event");

                if self.breaker.record_failure() {
                    metrics::counter!("circuit_breaker_opened_total").increment(1);
                    warn!(
                        failures = self.breaker.config().failure_threshold,
                        cooldown = ?self.breaker.config().cooldown,
                        "Circuit opened after consecutive publish failures"
                    );
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{ConnectionConfig, InMemoryBroker, TransportError};

    async fn connected_publisher(broker: &InMemoryBroker) -> EventPublisher {
        let connection = ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionConfig::default(),
            CancellationToken::new(),
        );
        connection.ensure_connected().await.unwrap();
        EventPublisher::new(
            connection,
            PublisherConfig::default(),
            CircuitBreakerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_success() {
        let broker = InMemoryBroker::new();
        let publisher = connected_publisher(&broker).await;

        publisher
            .publish("order.created", &json!({"orderId": "abc"}))
            .await
            .unwrap();

        assert_eq!(broker.emitted_count("order.created"), 1);
        assert_eq!(publisher.circuit_state().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_publish_fails_fast() {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionConfig::default(),
            CancellationToken::new(),
        );
        let publisher = EventPublisher::new(
            connection,
            PublisherConfig::default(),
            CircuitBreakerConfig::default(),
        );

        let result = publisher.publish("order.created", &json!({})).await;

        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(broker.emit_attempts(), 0);
        assert_eq!(publisher.circuit_state().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_reported_and_counted() {
        let broker = InMemoryBroker::new();
        let publisher = connected_publisher(&broker).await;
        broker.set_fail_on_emit(true);

        let result = publisher.publish("order.created", &json!({})).await;

        assert!(matches!(
            result,
            Err(PublishError::Transport(TransportError::Io(_)))
        ));
        assert_eq!(publisher.circuit_state().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publish_times_out() {
        let broker = InMemoryBroker::new();
        let publisher = connected_publisher(&broker).await;
        broker.set_emit_delay(Some(Duration::from_secs(10)));

        let result = publisher.publish("order.created", &json!({})).await;

        assert_eq!(result, Err(PublishError::Timeout(Duration::from_secs(5))));
        assert_eq!(publisher.circuit_state().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_five_failures_then_recovers() {
        let broker = InMemoryBroker::new();
        let publisher = connected_publisher(&broker).await;
        broker.set_fail_on_emit(true);

        for _ in 0..5 {
            assert!(publisher.publish("order.created", &json!({})).await.is_err());
        }
        assert!(publisher.circuit_state().is_open);
        assert_eq!(broker.emit_attempts(), 5);

        // Open circuit: no I/O
        let result = publisher.publish("order.created", &json!({})).await;
        assert_eq!(result, Err(PublishError::CircuitOpen));
        assert_eq!(broker.emit_attempts(), 5);

        broker.set_fail_on_emit(false);
        tokio::time::advance(Duration::from_secs(60)).await;

        publisher
            .publish("order.created", &json!({}))
            .await
            .unwrap();
        let state = publisher.circuit_state();
        assert!(!state.is_open);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(broker.emit_attempts(), 6);
    }
}
