//! Order store.
//!
//! Owns `Order` and `OrderItem`. An order and its items are written in one local
//! transaction; afterwards only the order's status changes.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{Money, OrderId, Sku};
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use model::{Order, OrderItem, OrderStatus, OrderWithItems};
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
