//! Order creation through the fulfillment saga, and order lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use orders::OrderWithItems;
use saga::{FulfillmentOutcome, OrderRequest};

use super::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

/// POST /orders: runs the saga to a terminal status.
///
/// Both CONFIRMED and FAILED_RESERVATION answer 201; the latter carries the
/// refused lines in `failed_items`.
#[tracing::instrument(skip(state, req), fields(items = req.items.len()))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> Result<(StatusCode, Json<FulfillmentOutcome>), ApiError> {
    let outcome = state.saga.create_order(req).await?;
    tracing::info!(
        order_id = %outcome.order.order.id,
        status = %outcome.status(),
        "order created"
    );
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state
        .saga
        .get_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}
