//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::{ErrorCode, InventoryError};
use saga::SagaError;
use serde_json::{Value, json};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
///
/// Every response body has the shape `{"code", "message", "details"}` where
/// `code` comes from the inventory error vocabulary where one applies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, code, details) = match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", Value::Null),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", Value::Null),
            ApiError::Inventory(err) => inventory_error_parts(&err),
            ApiError::Saga(err) => saga_error_parts(&err),
        };

        if status.is_server_error() {
            tracing::error!(%status, code, error = %message, "request failed");
        } else {
            tracing::debug!(%status, code, error = %message, "request rejected");
        }

        let body = json!({ "code": code, "message": message, "details": details });
        (status, axum::Json(body)).into_response()
    }
}

fn inventory_error_parts(err: &InventoryError) -> (StatusCode, &'static str, Value) {
    let details = match err {
        InventoryError::Validation(errors) => json!({ "invalid_values": errors }),
        InventoryError::SkuNotFound { skus } => json!({ "skus": skus }),
        InventoryError::SkuUomMismatch {
            sku,
            expected,
            requested,
        } => json!({ "sku": sku, "expected": expected, "requested": requested }),
        _ => Value::Null,
    };
    (inventory_status(err), err.code().as_str(), details)
}

fn inventory_status(err: &InventoryError) -> StatusCode {
    match err.code() {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::SkuNotFound => StatusCode::NOT_FOUND,
        ErrorCode::SkuUomPairNotMatch => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::DbUnavailable | ErrorCode::DbErrorTransaction => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::InternalError
        | ErrorCode::InsufficientQuantityToReserve
        | ErrorCode::InsufficientQuantityToRelease => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_error_parts(err: &SagaError) -> (StatusCode, &'static str, Value) {
    match err {
        SagaError::Validation(errors) => (
            StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError.as_str(),
            json!({ "invalid_values": errors }),
        ),
        SagaError::Inventory(inner) => inventory_error_parts(inner),
        SagaError::Persistence(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DbErrorTransaction.as_str(),
            Value::Null,
        ),
        // The order exists and is CANCELLED; the cause is always infrastructure
        SagaError::ReservationFailed { order_id, source } => (
            StatusCode::SERVICE_UNAVAILABLE,
            source.code().as_str(),
            json!({ "order_id": order_id, "order_status": "CANCELLED" }),
        ),
        SagaError::StatusUpdateFailed {
            order_id, status, ..
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DbErrorTransaction.as_str(),
            json!({ "order_id": order_id, "intended_status": status }),
        ),
        SagaError::InvalidTransition { order_id, from, to } => (
            StatusCode::CONFLICT,
            ErrorCode::InternalError.as_str(),
            json!({ "order_id": order_id, "from": from, "to": to }),
        ),
    }
}
