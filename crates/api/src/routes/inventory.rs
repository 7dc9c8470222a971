//! Inventory endpoints.
//!
//! A refused reserve or release is still 200: the refusal is in `failed_items`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use inventory::{CheckStockResponse, InventoryClient, ReservationResponse, StockRequest};

use super::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

/// POST /inventory/check
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockRequest>,
) -> Result<Json<CheckStockResponse>, ApiError> {
    Ok(Json(state.inventory.check_stock(req).await?))
}

/// POST /inventory/reserve
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    Ok(Json(state.inventory.reserve_stock(req).await?))
}

/// POST /inventory/release
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StockRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    Ok(Json(state.inventory.release_stock(req).await?))
}

/// POST /inventory/orders/{id}/release: gives back everything the order holds.
#[tracing::instrument(skip(state))]
pub async fn release_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.inventory.release_order(order_id).await?))
}
