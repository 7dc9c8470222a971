//! Shared identifiers and value types.

pub mod money;
pub mod quantity;
pub mod types;

pub use money::Money;
pub use quantity::Quantity;
pub use types::{OrderId, Sku};
