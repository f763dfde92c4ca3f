//! Order status machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING ──┬──► CONFIRMED
///           ├──► FAILED            (reservation failed or validity window expired)
///           └──► CANCELLING ──┬──► CANCELLED
///                             └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Waiting for the inventory service to reserve stock.
    #[default]
    Pending,

    /// Stock was reserved (terminal state).
    Confirmed,

    /// Cancellation requested, waiting for the inventory service to release stock.
    Cancelling,

    /// Reservation released after a cancellation (terminal state).
    Cancelled,

    /// Reservation failed or the order expired (terminal state).
    Failed,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Cancelling,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
    ];

    /// Statuses that still accept transitions and edits.
    pub const OPEN: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Cancelling];

    /// Returns true if a reservation confirmation applies in this status.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a reservation failure applies in this status.
    pub fn can_fail(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a cancellation can be requested in this status.
    pub fn can_request_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Cancelling)
    }

    /// Returns true if a reservation-cancelled event completes the cancellation.
    pub fn can_complete_cancel(&self) -> bool {
        matches!(self, OrderStatus::Cancelling)
    }

    /// Returns true if the order can expire in this status.
    pub fn can_expire(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelling => "CANCELLING",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    /// Parses a status name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownOrderStatus(s.to_string()))
    }
}
