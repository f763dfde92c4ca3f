//! The order record.

use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{OrderStatus, Quantity, Sku};

/// An order as persisted by the store.
///
/// `expires_at` is set exactly when `status` is PENDING. Terminal orders are
/// never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub sku: Sku,
    pub quantity: Quantity,
    pub status: OrderStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new PENDING order that expires `validity` after `now`.
    pub fn pending(sku: Sku, quantity: Quantity, now: DateTime<Utc>, validity: Duration) -> Self {
        Self {
            id: OrderId::new(),
            sku,
            quantity,
            status: OrderStatus::Pending,
            expires_at: Some(now + validity),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the order is PENDING and its validity window closed before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.can_expire() && self.expires_at.is_some_and(|at| at < now)
    }

    /// Returns true if the expiry invariant holds for this record.
    pub fn expiry_consistent(&self) -> bool {
        (self.status == OrderStatus::Pending) == self.expires_at.is_some()
    }

    /// Moves the record to `status`, clearing the expiry for anything but PENDING.
    pub fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        if status != OrderStatus::Pending {
            self.expires_at = None;
        }
        self.updated_at = at;
    }
}
