//! Order model, lifecycle, and the messages exchanged about it.

mod commands;
mod events;
mod model;
mod status;
mod value_objects;

pub use commands::{CreateOrder, OrderChanges, UpdateOrder};
pub use events::{
    AvailabilityReply, AvailabilityRequest, IntegrationEvent, OrderCancelled, OrderCreated,
    ReservationCancelled, ReservationConfirmed, ReservationFailed,
};
pub use model::Order;
pub use status::OrderStatus;
pub use value_objects::{Quantity, Sku};
