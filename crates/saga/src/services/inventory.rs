//! Stock validation against the inventory service.

use std::time::{Duration, Instant};

use broker::{ConnectionManager, TransportError};
use domain::{AvailabilityReply, AvailabilityRequest, IntegrationEvent, Quantity, Sku};
use tracing::{debug, warn};

use crate::error::{Result, SagaError};

/// Checks SKU existence and stock with a request/reply call over the broker.
///
/// The call suspends only the caller. A missing consumer, a timeout, a reply
/// that cannot be decoded, and any other transport failure are all reported
/// as service unavailable. A reply that rejects the SKU or quantity is
/// reported as an invalid parameter.
#[derive(Clone)]
pub struct InventoryValidator {
    connection: ConnectionManager,
    timeout: Duration,
}

impl InventoryValidator {
    pub fn new(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    #[tracing::instrument(skip(self), fields(sku = %sku, quantity = %quantity))]
    pub async fn validate(&self, sku: &Sku, quantity: Quantity) -> Result<()> {
        if !self.connection.is_connected() {
            return Err(SagaError::ServiceUnavailable(
                "Inventory service unavailable: message broker is not connected".to_string(),
            ));
        }

        let request = serde_json::to_value(AvailabilityRequest {
            sku: sku.clone(),
            quantity,
        })?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.connection
                .transport()
                .send(AvailabilityRequest::NAME, &request),
        )
        .await;
        metrics::histogram!("inventory_validation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(TransportError::NoHandler(pattern))) => {
                warn!(pattern = %pattern, "No inventory consumer for availability check");
                return Err(SagaError::ServiceUnavailable(
                    "Inventory service endpoint not available".to_string(),
                ));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Availability check failed");
                return Err(SagaError::ServiceUnavailable(
                    "Inventory service unavailable".to_string(),
                ));
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Availability check timed out");
                return Err(SagaError::ServiceUnavailable(
                    "Inventory service request timed out".to_string(),
                ));
            }
        };

        let reply: AvailabilityReply = serde_json::from_value(reply).map_err(|e| {
            warn!(error = %e, "Malformed availability reply");
            SagaError::ServiceUnavailable("Inventory service unavailable".to_string())
        })?;
        debug!(?reply, "Availability reply received");

        if !reply.sku_exists {
            return Err(SagaError::InvalidParameter(format!("Invalid SKU: {sku}")));
        }
        if !reply.has_available_stock {
            return Err(SagaError::InvalidParameter(format!(
                "Insufficient stock for SKU {sku}: requested {quantity}, available {}",
                reply.available_quantity
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use broker::{ConnectionConfig, InMemoryBroker};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ErrorKind;

    async fn validator(broker: &InMemoryBroker) -> InventoryValidator {
        let connection = ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionConfig::default(),
            CancellationToken::new(),
        );
        connection.ensure_connected().await.unwrap();
        InventoryValidator::new(connection, Duration::from_secs(5))
    }

    fn stock(broker: &InMemoryBroker, available: u64) {
        broker.on_request("check_availability", move |request| {
            let requested = request["quantity"].as_u64().unwrap_or(0);
            Ok(json!({
                "skuExists": request["sku"] == "TEST-001",
                "hasAvailableStock": requested <= available,
                "availableQuantity": available,
            }))
        });
    }

    fn sku(raw: &str) -> Sku {
        Sku::parse(raw).unwrap()
    }

    fn qty(n: i64) -> Quantity {
        Quantity::new(n).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_stock_passes() {
        let broker = InMemoryBroker::new();
        stock(&broker, 10);
        let validator = validator(&broker).await;

        validator.validate(&sku("TEST-001"), qty(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_sku_is_invalid_parameter() {
        let broker = InMemoryBroker::new();
        stock(&broker, 10);
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("NOPE-404"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(err.to_string(), "Invalid SKU: NOPE-404");
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_stock_names_both_quantities() {
        let broker = InMemoryBroker::new();
        stock(&broker, 3);
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("TEST-001"), qty(5))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let message = err.to_string();
        assert!(message.contains("requested 5"), "{message}");
        assert!(message.contains("available 3"), "{message}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_fails_without_request() {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionConfig::default(),
            CancellationToken::new(),
        );
        broker.on_request("check_availability", |_| panic!("must not be called"));
        let validator = InventoryValidator::new(connection, Duration::from_secs(5));

        let err = validator
            .validate(&sku("TEST-001"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_consumer_is_endpoint_not_available() {
        let broker = InMemoryBroker::new();
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("TEST-001"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.to_string(), "Inventory service endpoint not available");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reply_times_out() {
        let broker = InMemoryBroker::new();
        stock(&broker, 10);
        broker.set_request_delay(Some(Duration::from_secs(6)));
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("TEST-001"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.to_string(), "Inventory service request timed out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_service_unavailable() {
        let broker = InMemoryBroker::new();
        broker.on_request("check_availability", |_| {
            Err(TransportError::Io("channel closed".to_string()))
        });
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("TEST-001"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Inventory service unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply_is_service_unavailable() {
        let broker = InMemoryBroker::new();
        broker.on_request("check_availability", |_| Ok(json!({ "skuExists": "yes" })));
        let validator = validator(&broker).await;

        let err = validator
            .validate(&sku("TEST-001"), qty(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.to_string(), "Inventory service unavailable");
    }
}
