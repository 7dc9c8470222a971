//! Saga coordinator for the order fulfillment workflow.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use common::{Money, OrderId};
use inventory::{
    CheckStockResponse, DeadlineClient, InventoryClient, InventoryError, StockStatus,
    ValidationErrors,
};
use orders::{Order, OrderItem, OrderStatus, OrderStore, OrderStoreError, OrderWithItems};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::order_fulfillment;
use crate::request::OrderRequest;

/// Tunables of a saga run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    /// Upper bound on each inventory call.
    pub deadline: Duration,
    /// Release whatever the order holds when reservation fails for an infrastructure
    /// reason, or when the order turns out to be settled elsewhere.
    pub compensate_on_cancel: bool,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            compensate_on_cancel: true,
        }
    }
}

/// What a completed run hands back.
///
/// `failed_items` is non-empty exactly when the order is FAILED_RESERVATION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentOutcome {
    pub order: OrderWithItems,
    pub failed_items: Vec<StockStatus>,
}

impl FulfillmentOutcome {
    pub fn status(&self) -> OrderStatus {
        self.order.order.status
    }
}

/// Orchestrates the order fulfillment saga.
///
/// The coordinator owns no stock; the inventory client is the only way it
/// touches the ledger, and every call is bounded by [`SagaConfig::deadline`].
/// Concurrent runs never coordinate with each other here: they serialize on
/// the ledger's per-SKU rows.
pub struct FulfillmentSaga<I, S> {
    inventory: DeadlineClient<I>,
    store: S,
    config: SagaConfig,
}

impl<I, S> FulfillmentSaga<I, S>
where
    I: InventoryClient,
    S: OrderStore,
{
    /// Creates a saga coordinator with the default configuration.
    pub fn new(inventory: I, store: S) -> Self {
        Self::with_config(inventory, store, SagaConfig::default())
    }

    pub fn with_config(inventory: I, store: S, config: SagaConfig) -> Self {
        Self {
            inventory: DeadlineClient::new(inventory, config.deadline),
            store,
            config,
        }
    }

    /// Creates an order and drives it to a terminal status.
    ///
    /// Insufficient stock is an `Ok` outcome with the order in FAILED_RESERVATION.
    /// An infrastructure failure while reserving leaves the order CANCELLED and
    /// returns [`SagaError::ReservationFailed`].
    #[tracing::instrument(
        skip(self, request),
        fields(saga_type = order_fulfillment::SAGA_TYPE, user_id = %request.user_id)
    )]
    pub async fn create_order(&self, request: OrderRequest) -> Result<FulfillmentOutcome> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let result = self.execute(request).await;

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        metrics::counter!("saga_outcomes_total", "outcome" => outcome_label(&result)).increment(1);
        result
    }

    /// Loads an order with its items.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderWithItems>> {
        Ok(self.store.get_order_with_items(order_id).await?)
    }

    async fn execute(&self, request: OrderRequest) -> Result<FulfillmentOutcome> {
        request.validate()?;

        let order_id = OrderId::new();
        let stock_request = request.stock_request(order_id);

        // 1. Snapshot prices and UOMs; nothing is held yet
        tracing::info!(step = order_fulfillment::STEP_CHECK_AVAILABILITY, %order_id, "saga step started");
        let snapshot = self.inventory.check_stock(stock_request.clone()).await?;

        // 2. Persist the order as PENDING
        let (order, items) = build_order(order_id, &request, &snapshot)?;
        tracing::info!(
            step = order_fulfillment::STEP_PERSIST_ORDER,
            %order_id,
            total = %order.total_amount,
            currency = %order.currency,
            "saga step started"
        );
        self.store.insert_order_with_items(&order, &items).await?;

        // 3. Reserve every item or none
        tracing::info!(step = order_fulfillment::STEP_RESERVE_STOCK, %order_id, "saga step started");
        match self.inventory.reserve_stock(stock_request).await {
            Ok(response) if response.is_success() => {
                let order = match self.finalize(&order, OrderStatus::Confirmed).await {
                    Ok(order) => order,
                    Err(e @ SagaError::InvalidTransition { .. }) => {
                        // Someone else settled the order; do not keep its stock
                        if self.config.compensate_on_cancel {
                            self.compensate(order_id).await;
                        }
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                tracing::info!(%order_id, reserved = response.success_items.len(), "order confirmed");
                Ok(FulfillmentOutcome {
                    order: OrderWithItems { order, items },
                    failed_items: Vec::new(),
                })
            }
            Ok(response) => {
                let order = self.finalize(&order, OrderStatus::FailedReservation).await?;
                tracing::info!(%order_id, failed = response.failed_items.len(), "insufficient stock");
                Ok(FulfillmentOutcome {
                    order: OrderWithItems { order, items },
                    failed_items: response.failed_items,
                })
            }
            Err(source) => {
                tracing::error!(%order_id, error = %source, "stock reservation failed");
                if self.config.compensate_on_cancel {
                    self.compensate(order_id).await;
                }
                self.finalize(&order, OrderStatus::Cancelled).await?;
                Err(SagaError::ReservationFailed { order_id, source })
            }
        }
    }

    /// Moves the order to its terminal status.
    ///
    /// The move is checked against the stored status, not the copy this run
    /// built, so an order settled elsewhere in the meantime is not overwritten.
    async fn finalize(&self, order: &Order, status: OrderStatus) -> Result<Order> {
        tracing::info!(
            step = order_fulfillment::STEP_FINALIZE_STATUS,
            order_id = %order.id,
            %status,
            "saga step started"
        );

        let stored = match self.store.get_order(order.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                let source = OrderStoreError::NotFound(order.id);
                return Err(status_update_failed(order.id, status, source));
            }
            Err(source) => return Err(status_update_failed(order.id, status, source)),
        };
        if !stored.status.can_transition_to(status) {
            tracing::warn!(
                order_id = %order.id,
                from = %stored.status,
                to = %status,
                "order already settled"
            );
            return Err(SagaError::InvalidTransition {
                order_id: order.id,
                from: stored.status,
                to: status,
            });
        }

        self.store
            .update_order_status(order.id, status)
            .await
            .map_err(|source| status_update_failed(order.id, status, source))
    }

    /// Gives back whatever the order still holds. Best effort.
    ///
    /// A reserve that timed out may have committed; releasing by order covers
    /// both cases since only RESERVED records of this order are touched.
    async fn compensate(&self, order_id: OrderId) {
        tracing::info!(step = order_fulfillment::STEP_RELEASE_ORDER, %order_id, "compensation started");

        match self.inventory.release_order(order_id).await {
            Ok(response) if response.is_success() => {
                metrics::counter!("saga_compensations_total", "outcome" => "released").increment(1);
                tracing::info!(
                    %order_id,
                    released = response.success_items.len(),
                    "compensation completed"
                );
            }
            Ok(response) => {
                metrics::counter!("saga_compensations_total", "outcome" => "refused").increment(1);
                tracing::warn!(
                    %order_id,
                    failed = response.failed_items.len(),
                    "compensation refused by ledger"
                );
            }
            Err(e) => {
                metrics::counter!("saga_compensations_total", "outcome" => "failed").increment(1);
                tracing::warn!(%order_id, error = %e, "compensation failed");
            }
        }
    }
}

fn status_update_failed(order_id: OrderId, status: OrderStatus, source: OrderStoreError) -> SagaError {
    metrics::counter!("saga_status_update_failures_total").increment(1);
    tracing::error!(
        %order_id,
        %status,
        error = %source,
        "order status and ledger now disagree"
    );
    SagaError::StatusUpdateFailed {
        order_id,
        status,
        source,
    }
}

/// Builds the PENDING order and its items from the availability snapshot.
fn build_order(
    order_id: OrderId,
    request: &OrderRequest,
    snapshot: &CheckStockResponse,
) -> Result<(Order, Vec<OrderItem>)> {
    let mut items = Vec::with_capacity(request.items.len());
    let mut currencies = BTreeSet::new();

    for line in &request.items {
        let status = snapshot.get(&line.sku).ok_or_else(|| InventoryError::SkuNotFound {
            skus: vec![line.sku.clone()],
        })?;
        currencies.insert(status.currency.as_str());
        items.push(OrderItem::new(
            order_id,
            line.sku.clone(),
            line.quantity,
            Money::from_major(status.price),
            status.uom.clone(),
        ));
    }

    if currencies.len() > 1 {
        let mut errors = ValidationErrors::default();
        let listed: Vec<&str> = currencies.into_iter().collect();
        errors.push("items", format!("mixed currencies: {}", listed.join(", ")));
        return Err(SagaError::Validation(errors));
    }
    let currency = currencies.first().copied().unwrap_or_default().to_string();

    let order = Order::pending(
        order_id,
        request.user_id.trim(),
        request.user_email.trim(),
        currency,
        &items,
    );
    Ok((order, items))
}

fn outcome_label(result: &Result<FulfillmentOutcome>) -> &'static str {
    match result {
        Ok(outcome) => match outcome.status() {
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::FailedReservation => "failed_reservation",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Pending => "pending",
        },
        Err(SagaError::ReservationFailed { .. }) => "cancelled",
        Err(e) if e.is_infrastructure() => "error",
        Err(_) => "rejected",
    }
}
