use std::time::Duration;

use thiserror::Error;

/// Errors reported by a broker transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No consumer is registered for the request pattern.
    #[error("No handler registered for pattern '{0}'")]
    NoHandler(String),

    /// The transport has no open connection.
    #[error("Broker is not connected")]
    NotConnected,

    /// The service is shutting down; no further attempts are made.
    #[error("Broker connection shut down")]
    Shutdown,

    /// Any other I/O or protocol failure.
    #[error("Broker I/O error: {0}")]
    Io(String),
}

/// Errors returned by [`EventPublisher::publish`](crate::EventPublisher::publish).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The broker connection is down. No I/O was attempted.
    #[error("Message broker is not connected")]
    NotConnected,

    /// Too many consecutive failures. No I/O was attempted.
    #[error("Circuit is open, message broker is unavailable")]
    CircuitOpen,

    /// The publish did not complete within the timeout.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// The transport rejected the publish.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_transparent() {
        let err = PublishError::from(TransportError::NoHandler("order.created".into()));
        assert_eq!(
            err.to_string(),
            "No handler registered for pattern 'order.created'"
        );
    }
}
