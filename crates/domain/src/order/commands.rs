//! Order commands.

use serde::Deserialize;

use crate::error::DomainError;

use super::{Quantity, Sku};

/// Request to place a new order.
///
/// Carries raw caller input; `validate` turns it into domain values before
/// anything touches the network or the store.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    /// Product being ordered.
    pub sku: String,

    /// Units requested.
    pub quantity: i64,
}

impl CreateOrder {
    /// Creates a new CreateOrder command.
    pub fn new(sku: impl Into<String>, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }

    /// Checks the SKU and quantity locally.
    pub fn validate(&self) -> Result<(Sku, Quantity), DomainError> {
        let quantity = Quantity::new(self.quantity)?;
        let sku = Sku::parse(&self.sku)?;
        Ok((sku, quantity))
    }
}

/// Partial update of an order's editable fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrder {
    pub sku: Option<String>,
    pub quantity: Option<i64>,
}

impl UpdateOrder {
    /// Validates whichever fields are present.
    pub fn validate(&self) -> Result<OrderChanges, DomainError> {
        let changes = OrderChanges {
            sku: self.sku.as_deref().map(Sku::parse).transpose()?,
            quantity: self.quantity.map(Quantity::new).transpose()?,
        };
        if changes.is_empty() {
            return Err(DomainError::EmptyUpdate);
        }
        Ok(changes)
    }
}

/// Validated field changes ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderChanges {
    pub sku: Option<Sku>,
    pub quantity: Option<Quantity>,
}

impl OrderChanges {
    /// Returns true if no field would change.
    pub fn is_empty(&self) -> bool {
        self.sku.is_none() && self.quantity.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_order_validates_quantity_first() {
        let err = CreateOrder::new("", 0).validate().unwrap_err();
        assert_eq!(err, DomainError::InvalidQuantity { quantity: 0 });
    }

    #[test]
    fn test_create_order_valid() {
        let (sku, quantity) = CreateOrder::new("TEST-001", 5).validate().unwrap();
        assert_eq!(sku.as_str(), "TEST-001");
        assert_eq!(quantity.get(), 5);
    }

    #[test]
    fn test_update_requires_a_change() {
        let err = UpdateOrder::default().validate().unwrap_err();
        assert_eq!(err, DomainError::EmptyUpdate);
    }

    #[test]
    fn test_update_validates_present_fields() {
        let update = UpdateOrder {
            sku: None,
            quantity: Some(-1),
        };
        assert!(update.validate().is_err());

        let update = UpdateOrder {
            sku: Some("NEW-SKU".into()),
            quantity: None,
        };
        let changes = update.validate().unwrap();
        assert_eq!(changes.sku.unwrap().as_str(), "NEW-SKU");
        assert!(changes.quantity.is_none());
    }
}
