//! Message broker plumbing for the order service.
//!
//! The transport itself sits behind [`BrokerTransport`]. On top of it:
//!
//! - [`ConnectionManager`] keeps the connection up: single-flight connects,
//!   infinite retry with a fixed delay, one scheduled reconnect per drop.
//! - [`CircuitBreaker`] counts consecutive publish failures and fails fast
//!   for a cooldown once the threshold is reached.
//! - [`EventPublisher`] publishes fire-and-forget events gated by both, with
//!   a per-call timeout.

pub mod circuit_breaker;
pub mod connection;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use connection::{ConnectionConfig, ConnectionManager, redact_credentials};
pub use error::{PublishError, TransportError};
pub use memory::{EmittedEvent, InMemoryBroker};
pub use publisher::{EventPublisher, PublisherConfig};
pub use transport::{BrokerTransport, ConnectionEvent, InboundMessage};
