use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::TransportError;

/// Signals raised by the transport when an established connection goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was closed.
    Closed,
    /// The connection failed with an error.
    Error(String),
}

/// An event delivered to this service by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Event name the message was published under.
    pub pattern: String,
    pub payload: Value,
}

impl InboundMessage {
    pub fn new(pattern: impl Into<String>, payload: Value) -> Self {
        Self {
            pattern: pattern.into(),
            payload,
        }
    }
}

/// A message broker client.
///
/// Implementations own the wire protocol. Connection lifecycle policy (retry,
/// single-flight, reconnect) lives in [`ConnectionManager`](crate::ConnectionManager).
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Opens the connection. Called again after a drop.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Subscribes to close/error notifications for the current connection.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Publishes a fire-and-forget event.
    async fn emit(&self, pattern: &str, payload: &Value) -> Result<(), TransportError>;

    /// Sends a request and waits for the correlated reply.
    ///
    /// Fails with [`TransportError::NoHandler`] when nothing on the other side
    /// consumes `pattern`.
    async fn send(&self, pattern: &str, payload: &Value) -> Result<Value, TransportError>;

    /// Starts consuming inbound events for this service.
    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundMessage>, TransportError>;
}
