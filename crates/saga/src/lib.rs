//! Order fulfillment saga.
//!
//! One saga run drives one order through:
//! 1. Check availability (read-only snapshot of prices and UOMs)
//! 2. Persist the order and its items as PENDING
//! 3. Reserve every item as one batch
//! 4. Move the order to CONFIRMED, FAILED_RESERVATION or CANCELLED
//!
//! The run is strictly forward-moving; PENDING is never observed once it returns,
//! except when the final status write itself fails.

pub mod coordinator;
pub mod error;
pub mod order_fulfillment;
pub mod request;

pub use coordinator::{FulfillmentOutcome, FulfillmentSaga, SagaConfig};
pub use error::{Result, SagaError};
pub use request::{OrderLine, OrderRequest};
