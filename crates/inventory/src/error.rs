use std::time::Duration;

use common::Sku;
use ledger::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error vocabulary surfaced to callers of the inventory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    SkuNotFound,
    SkuUomPairNotMatch,
    DbUnavailable,
    DbErrorTransaction,
    DeadlineExceeded,
    InternalError,
    InsufficientQuantityToReserve,
    InsufficientQuantityToRelease,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::SkuNotFound => "SKU_NOT_FOUND",
            ErrorCode::SkuUomPairNotMatch => "SKU_UOM_PAIR_NOT_MATCH",
            ErrorCode::DbUnavailable => "DB_UNAVAILABLE",
            ErrorCode::DbErrorTransaction => "DB_ERROR_TRANSACTION",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::InsufficientQuantityToReserve => "INSUFFICIENT_QUANTITY_TO_RESERVE",
            ErrorCode::InsufficientQuantityToRelease => "INSUFFICIENT_QUANTITY_TO_RELEASE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single invalid field in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path of the offending field, e.g. `items[1].sku`.
    pub field: String,
    pub message: String,
}

/// Every problem found while validating a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Errors returned by the inventory service.
///
/// Insufficient quantity is not an error: it comes back in `failed_items`.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The request was malformed; nothing touched the ledger.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// One or more requested SKUs have no stock record.
    #[error("SKU not found: {}", join_skus(.skus))]
    SkuNotFound { skus: Vec<Sku> },

    /// The request named a UOM other than the one the SKU is stocked in.
    #[error("UOM '{requested}' does not match SKU {sku} (stocked in '{expected}')")]
    SkuUomMismatch {
        sku: Sku,
        expected: String,
        requested: String,
    },

    /// The ledger's storage could not be reached.
    #[error("Inventory storage unavailable: {0}")]
    Unavailable(#[source] LedgerError),

    /// A ledger statement or commit failed.
    #[error("Inventory transaction failed: {0}")]
    Transaction(#[source] LedgerError),

    /// The call did not complete within its deadline. Its effect is unknown.
    #[error("Inventory call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Internal inventory error: {0}")]
    Internal(String),
}

impl InventoryError {
    /// Maps the error onto the stable vocabulary.
    pub fn code(&self) -> ErrorCode {
        match self {
            InventoryError::Validation(_) => ErrorCode::ValidationError,
            InventoryError::SkuNotFound { .. } => ErrorCode::SkuNotFound,
            InventoryError::SkuUomMismatch { .. } => ErrorCode::SkuUomPairNotMatch,
            InventoryError::Unavailable(_) => ErrorCode::DbUnavailable,
            InventoryError::Transaction(_) => ErrorCode::DbErrorTransaction,
            InventoryError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            InventoryError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// True for faults of the system rather than of the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            InventoryError::Unavailable(_)
                | InventoryError::Transaction(_)
                | InventoryError::DeadlineExceeded(_)
                | InventoryError::Internal(_)
        )
    }
}

impl From<ValidationErrors> for InventoryError {
    fn from(errors: ValidationErrors) -> Self {
        InventoryError::Validation(errors)
    }
}

impl From<LedgerError> for InventoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SkuNotFound(sku) => InventoryError::SkuNotFound { skus: vec![sku] },
            LedgerError::InvalidQuantity { sku, quantity } => {
                let mut errors = ValidationErrors::default();
                errors.push(sku.to_string(), format!("invalid quantity {quantity}"));
                InventoryError::Validation(errors)
            }
            e if e.is_unavailable() => InventoryError::Unavailable(e),
            e @ LedgerError::Database(_) => InventoryError::Transaction(e),
            e => InventoryError::Internal(e.to_string()),
        }
    }
}

fn join_skus(skus: &[Sku]) -> String {
    skus.iter()
        .map(Sku::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_stable_names() {
        assert_eq!(ErrorCode::SkuUomPairNotMatch.as_str(), "SKU_UOM_PAIR_NOT_MATCH");
        assert_eq!(
            serde_json::to_value(ErrorCode::InsufficientQuantityToReserve).unwrap(),
            "INSUFFICIENT_QUANTITY_TO_RESERVE"
        );
    }

    #[test]
    fn ledger_errors_map_to_vocabulary() {
        let unavailable = InventoryError::from(LedgerError::Unavailable("down".into()));
        assert_eq!(unavailable.code(), ErrorCode::DbUnavailable);
        assert!(unavailable.is_infrastructure());

        let corrupt = InventoryError::from(LedgerError::Corrupt("bad status".into()));
        assert_eq!(corrupt.code(), ErrorCode::InternalError);
        assert!(corrupt.is_infrastructure());

        let missing = InventoryError::from(LedgerError::SkuNotFound(Sku::new("GHOST")));
        assert_eq!(missing.code(), ErrorCode::SkuNotFound);
        assert!(!missing.is_infrastructure());
        assert_eq!(missing.to_string(), "SKU not found: GHOST");
    }

    #[test]
    fn validation_errors_render_every_field() {
        let mut errors = ValidationErrors::default();
        errors.push("items", "must not be empty");
        errors.push("order_id", "must be set");
        assert_eq!(
            errors.to_string(),
            "items: must not be empty; order_id: must be set"
        );
        assert!(errors.into_result().is_err());
        assert!(ValidationErrors::default().into_result().is_ok());
    }
}
