use thiserror::Error;

use crate::{Quantity, Sku};

/// Errors that can occur when interacting with the stock ledger.
///
/// Insufficient stock is not an error; it is reported as a
/// [`Shortfall`](crate::Shortfall) inside the operation outcome.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Quantity was zero or negative.
    #[error("Invalid quantity {quantity} for SKU {sku}")]
    InvalidQuantity { sku: Sku, quantity: Quantity },

    /// The SKU has no stock record.
    #[error("SKU not found: {0}")]
    SkuNotFound(Sku),

    /// A total-quantity adjustment would leave the record below its reservations,
    /// or out of range.
    #[error("Adjusting SKU {sku} by {delta} would leave total below reserved quantity {reserved}")]
    InvalidAdjustment {
        sku: Sku,
        delta: Quantity,
        reserved: Quantity,
    },

    /// The backing store could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true when the store itself could not be reached, as opposed to a
    /// statement or transaction failing once connected.
    pub fn is_unavailable(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Rejects quantities that cannot describe a stock movement.
pub(crate) fn validate_quantity(sku: &Sku, quantity: Quantity) -> Result<()> {
    if quantity.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::InvalidQuantity {
            sku: sku.clone(),
            quantity,
        })
    }
}
