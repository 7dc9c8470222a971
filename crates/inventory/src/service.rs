use std::collections::BTreeMap;

use chrono::Utc;
use common::{OrderId, Quantity, Sku};
use ledger::{Availability, ReservationStatus, Shortfall, StockLedger};

use crate::batch::{BatchExecutor, BatchResult};
use crate::error::{ErrorCode, InventoryError, Result};
use crate::wire::{CheckStockResponse, ReservationResponse, StockRequest, StockStatus};

/// The inventory service facade.
///
/// Validates requests, checks SKU existence and UOM before anything is mutated,
/// runs the batch, and translates ledger outcomes into wire responses. Refused
/// items come back in `failed_items`; only faults are returned as errors.
#[derive(Clone)]
pub struct InventoryService<L> {
    executor: BatchExecutor<L>,
}

impl<L: StockLedger> InventoryService<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            executor: BatchExecutor::new(ledger),
        }
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &L {
        self.executor.ledger()
    }

    /// Reports current quantities for the requested SKUs. Never mutates.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn check_stock(&self, request: &StockRequest) -> Result<CheckStockResponse> {
        let result = self.check_stock_inner(request).await;
        record_request("check", &result);
        result
    }

    /// Reserves every requested item for the order, or none of them.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn reserve_stock(&self, request: &StockRequest) -> Result<ReservationResponse> {
        let result = self.mutate(request, Mutation::Reserve).await;
        record_request("reserve", &result);
        result
    }

    /// Releases every requested item previously reserved by the order, or none of them.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn release_stock(&self, request: &StockRequest) -> Result<ReservationResponse> {
        let result = self.mutate(request, Mutation::Release).await;
        record_request("release", &result);
        result
    }

    /// Releases everything the order still holds.
    ///
    /// Idempotent: an order with no RESERVED records gets an empty success.
    #[tracing::instrument(skip(self))]
    pub async fn release_order(&self, order_id: OrderId) -> Result<ReservationResponse> {
        let result = self.release_order_inner(order_id).await;
        record_request("release_order", &result);
        result
    }

    async fn check_stock_inner(&self, request: &StockRequest) -> Result<CheckStockResponse> {
        let quantities = request.validate(true)?;
        let availability = self.preflight(request, &quantities).await?;

        let items = request
            .items
            .iter()
            .filter_map(|item| {
                availability
                    .get(&item.sku)
                    .map(|record| StockStatus::from_record(record, item.requested_qty_per_uom))
            })
            .collect();

        Ok(CheckStockResponse {
            items,
            timestamp: Utc::now(),
        })
    }

    async fn mutate(&self, request: &StockRequest, mutation: Mutation) -> Result<ReservationResponse> {
        let quantities = request.validate(false)?;
        self.preflight(request, &quantities).await?;
        self.run_batch(request.order_id, &quantities, mutation).await
    }

    async fn release_order_inner(&self, order_id: OrderId) -> Result<ReservationResponse> {
        let held = self
            .ledger()
            .reservations_for_order(order_id, Some(ReservationStatus::Reserved))
            .await?;

        let mut quantities: BTreeMap<Sku, Quantity> = BTreeMap::new();
        for record in held {
            *quantities.entry(record.sku).or_default() += record.quantity;
        }

        if quantities.is_empty() {
            tracing::debug!(%order_id, "order holds no reservations");
            return Ok(ReservationResponse::applied(order_id, Vec::new()));
        }

        self.run_batch(order_id, &quantities, Mutation::Release).await
    }

    /// Rejects unknown SKUs and UOM mismatches before any mutation.
    async fn preflight(
        &self,
        request: &StockRequest,
        quantities: &BTreeMap<Sku, Quantity>,
    ) -> Result<Availability> {
        let skus: Vec<Sku> = quantities.keys().cloned().collect();
        let availability = self.ledger().check_availability(&skus).await?;

        if !availability.is_complete() {
            return Err(InventoryError::SkuNotFound {
                skus: availability.missing,
            });
        }

        for (sku, uom) in request.requested_uoms() {
            if let Some(record) = availability.get(sku)
                && !record.uom.eq_ignore_ascii_case(uom)
            {
                return Err(InventoryError::SkuUomMismatch {
                    sku: sku.clone(),
                    expected: record.uom.clone(),
                    requested: uom.to_string(),
                });
            }
        }

        Ok(availability)
    }

    async fn run_batch(
        &self,
        order_id: OrderId,
        quantities: &BTreeMap<Sku, Quantity>,
        mutation: Mutation,
    ) -> Result<ReservationResponse> {
        let result = match mutation {
            Mutation::Reserve => self.executor.reserve_batch(order_id, quantities).await,
            Mutation::Release => self.executor.release_batch(order_id, quantities).await,
        };

        match result {
            BatchResult::AllApplied(records) => Ok(ReservationResponse::applied(order_id, records)),
            BatchResult::Insufficient {
                shortfall,
                current_status,
            } => {
                let failed_items = current_status
                    .iter()
                    .map(|record| {
                        let requested = quantities.get(&record.sku).copied().unwrap_or_default();
                        let status = StockStatus::from_record(record, requested.as_f64());
                        if &record.sku == shortfall.sku() {
                            status.with_error(failure_code(&shortfall, mutation))
                        } else {
                            status
                        }
                    })
                    .collect();
                Ok(ReservationResponse::refused(order_id, failed_items))
            }
            BatchResult::InfrastructureFailure(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Reserve,
    Release,
}

fn failure_code(shortfall: &Shortfall, mutation: Mutation) -> ErrorCode {
    match (shortfall, mutation) {
        (Shortfall::UnknownSku { .. }, _) => ErrorCode::SkuNotFound,
        (_, Mutation::Reserve) => ErrorCode::InsufficientQuantityToReserve,
        (_, Mutation::Release) => ErrorCode::InsufficientQuantityToRelease,
    }
}

fn record_request<T>(operation: &'static str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code().as_str(),
    };
    metrics::counter!(
        "inventory_requests_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    if let Err(e) = result {
        if e.is_infrastructure() {
            tracing::error!(operation, error = %e, "inventory request failed");
        } else {
            tracing::info!(operation, error = %e, "inventory request rejected");
        }
    }
}
