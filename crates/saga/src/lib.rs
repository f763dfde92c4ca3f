//! Order saga coordination.
//!
//! An order is validated against the inventory service, persisted as
//! PENDING, and announced with `order.created`. Its final status arrives
//! later as a reservation event from inventory, or from the timeout sweep if
//! nothing arrives in time.
//!
//! - [`OrderStateMachine`] owns creation, cancellation, edits, and the
//!   reservation event handlers.
//! - [`InventoryValidator`] runs the blocking availability check.
//! - [`OutboxRelay`] retries events that could not be published at creation.
//! - [`TimeoutSweeper`] fails orders whose validity window closed.
//! - [`Scheduler`] ticks the relay and the sweeper without overlap.
//! - [`EventDispatcher`] routes inbound broker events to handlers.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod outbox;
pub mod scheduler;
pub mod services;
pub mod sweeper;
#[cfg(test)]
mod test_store;

pub use config::{Environment, SagaConfig};
pub use coordinator::{OrderStateMachine, TransitionOutcome};
pub use dispatch::EventDispatcher;
pub use error::{ErrorKind, Result, SagaError};
pub use outbox::{FlushReport, OutboxRelay};
pub use scheduler::{GuardedTask, PeriodicTask, Scheduler, TickOutcome};
pub use services::InventoryValidator;
pub use sweeper::{SweepReport, TimeoutSweeper};
