//! The seam callers use to reach the inventory service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use ledger::StockLedger;

use crate::error::{InventoryError, Result};
use crate::service::InventoryService;
use crate::wire::{CheckStockResponse, ReservationResponse, StockRequest};

/// Send a request, get a typed response or a typed error.
///
/// Implemented in-process by [`InventoryService`]; a networked client would
/// implement the same trait.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn check_stock(&self, request: StockRequest) -> Result<CheckStockResponse>;

    async fn reserve_stock(&self, request: StockRequest) -> Result<ReservationResponse>;

    async fn release_stock(&self, request: StockRequest) -> Result<ReservationResponse>;

    async fn release_order(&self, order_id: OrderId) -> Result<ReservationResponse>;
}

#[async_trait]
impl<L: StockLedger> InventoryClient for InventoryService<L> {
    async fn check_stock(&self, request: StockRequest) -> Result<CheckStockResponse> {
        InventoryService::check_stock(self, &request).await
    }

    async fn reserve_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        InventoryService::reserve_stock(self, &request).await
    }

    async fn release_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        InventoryService::release_stock(self, &request).await
    }

    async fn release_order(&self, order_id: OrderId) -> Result<ReservationResponse> {
        InventoryService::release_order(self, order_id).await
    }
}

#[async_trait]
impl<C: InventoryClient + ?Sized> InventoryClient for Arc<C> {
    async fn check_stock(&self, request: StockRequest) -> Result<CheckStockResponse> {
        (**self).check_stock(request).await
    }

    async fn reserve_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        (**self).reserve_stock(request).await
    }

    async fn release_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        (**self).release_stock(request).await
    }

    async fn release_order(&self, order_id: OrderId) -> Result<ReservationResponse> {
        (**self).release_order(order_id).await
    }
}

/// Bounds every call of the wrapped client by a deadline.
///
/// A call that runs out of time fails with [`InventoryError::DeadlineExceeded`].
/// Its effect on the ledger is unknown: the mutation may or may not have committed.
#[derive(Clone)]
pub struct DeadlineClient<C> {
    inner: C,
    deadline: Duration,
}

impl<C: InventoryClient> DeadlineClient<C> {
    pub fn new(inner: C, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match tokio::time::timeout(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("inventory_deadline_exceeded_total", "operation" => operation)
                    .increment(1);
                tracing::warn!(operation, deadline = ?self.deadline, "inventory call timed out");
                Err(InventoryError::DeadlineExceeded(self.deadline))
            }
        }
    }
}

#[async_trait]
impl<C: InventoryClient> InventoryClient for DeadlineClient<C> {
    async fn check_stock(&self, request: StockRequest) -> Result<CheckStockResponse> {
        self.bounded("check", self.inner.check_stock(request)).await
    }

    async fn reserve_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        self.bounded("reserve", self.inner.reserve_stock(request))
            .await
    }

    async fn release_stock(&self, request: StockRequest) -> Result<ReservationResponse> {
        self.bounded("release", self.inner.release_stock(request))
            .await
    }

    async fn release_order(&self, order_id: OrderId) -> Result<ReservationResponse> {
        self.bounded("release_order", self.inner.release_order(order_id))
            .await
    }
}
