//! Saga error types.

use common::OrderId;
use inventory::{InventoryError, ValidationErrors};
use orders::{OrderStatus, OrderStoreError};
use thiserror::Error;

/// Errors that can occur during a saga run.
///
/// Insufficient stock is not an error: the run succeeds with the order in
/// FAILED_RESERVATION and the refused items attached.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order request was malformed. Nothing was written.
    #[error("Invalid order request: {0}")]
    Validation(ValidationErrors),

    /// The availability check failed. Nothing was written.
    #[error("Inventory service error: {0}")]
    Inventory(#[from] InventoryError),

    /// The order store failed. For a create, no order was left behind.
    #[error("Order store error: {0}")]
    Persistence(#[from] OrderStoreError),

    /// The reserve call failed for an infrastructure reason; the order is CANCELLED.
    #[error("Stock reservation failed for order {order_id}: {source}")]
    ReservationFailed {
        order_id: OrderId,
        #[source]
        source: InventoryError,
    },

    /// The terminal status could not be written; the order and ledger disagree.
    #[error("Failed to set order {order_id} to {status}: {source}")]
    StatusUpdateFailed {
        order_id: OrderId,
        status: OrderStatus,
        #[source]
        source: OrderStoreError,
    },

    /// The stored order had already left PENDING when the saga tried to settle it.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl SagaError {
    /// True for faults of the system rather than of the request.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            SagaError::Validation(_) => false,
            SagaError::Inventory(e) => e.is_infrastructure(),
            SagaError::Persistence(_)
            | SagaError::ReservationFailed { .. }
            | SagaError::StatusUpdateFailed { .. }
            | SagaError::InvalidTransition { .. } => true,
        }
    }

    /// The order the error concerns, when one was created.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            SagaError::ReservationFailed { order_id, .. }
            | SagaError::StatusUpdateFailed { order_id, .. }
            | SagaError::InvalidTransition { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for SagaError {
    fn from(errors: ValidationErrors) -> Self {
        SagaError::Validation(errors)
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
