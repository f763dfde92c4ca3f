//! Remote services the saga calls synchronously.

pub mod inventory;

pub use inventory::InventoryValidator;
