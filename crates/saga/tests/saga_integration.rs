//! Integration tests for the order fulfillment saga.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, Sku};
use inventory::{
    CheckStockResponse, ErrorCode, InventoryClient, InventoryError, InventoryService,
    ReservationResponse, StockRequest,
};
use ledger::{
    InMemoryLedger, Quantity, ReservationStatus, StockLedger, StockLedgerExt, StockRecord,
};
use orders::{InMemoryOrderStore, Order, OrderItem, OrderStatus, OrderStore};
use saga::{FulfillmentSaga, OrderLine, OrderRequest, SagaConfig, SagaError};

type TestSaga = FulfillmentSaga<Arc<dyn InventoryClient>, InMemoryOrderStore>;

/// Commits the reservation, then answers too late.
struct LateReserveClient {
    inner: InventoryService<InMemoryLedger>,
    delay: Duration,
}

#[async_trait]
impl InventoryClient for LateReserveClient {
    async fn check_stock(&self, request: StockRequest) -> inventory::Result<CheckStockResponse> {
        self.inner.check_stock(&request).await
    }

    async fn reserve_stock(&self, request: StockRequest) -> inventory::Result<ReservationResponse> {
        let response = self.inner.reserve_stock(&request).await;
        tokio::time::sleep(self.delay).await;
        response
    }

    async fn release_stock(&self, request: StockRequest) -> inventory::Result<ReservationResponse> {
        self.inner.release_stock(&request).await
    }

    async fn release_order(&self, order_id: OrderId) -> inventory::Result<ReservationResponse> {
        self.inner.release_order(order_id).await
    }
}

/// Another actor cancels every order right after it is written.
#[derive(Clone, Default)]
struct CancelledElsewhereStore {
    inner: InMemoryOrderStore,
}

#[async_trait]
impl OrderStore for CancelledElsewhereStore {
    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> orders::Result<()> {
        self.inner.insert_order_with_items(order, items).await?;
        self.inner
            .update_order_status(order.id, OrderStatus::Cancelled)
            .await?;
        Ok(())
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> orders::Result<Order> {
        self.inner.update_order_status(order_id, status).await
    }

    async fn get_order(&self, order_id: OrderId) -> orders::Result<Option<Order>> {
        self.inner.get_order(order_id).await
    }

    async fn get_order_items(&self, order_id: OrderId) -> orders::Result<Vec<OrderItem>> {
        self.inner.get_order_items(order_id).await
    }
}

struct TestHarness {
    ledger: InMemoryLedger,
    service: Arc<InventoryService<InMemoryLedger>>,
    store: InMemoryOrderStore,
}

impl TestHarness {
    fn new() -> Self {
        let ledger = InMemoryLedger::with_stock([
            StockRecord::new("OLIVE-OIL-1L", Quantity::units(10), "EA", 7.5, "USD"),
            StockRecord::new("FLOUR-1KG", Quantity::units(50), "EA", 1.2, "USD"),
            StockRecord::new("SAFFRON-1G", Quantity::units(1), "EA", 12.0, "USD"),
            StockRecord::new("ESPRESSO-250G", Quantity::units(20), "BAG", 6.0, "EUR"),
        ]);
        let service = Arc::new(InventoryService::new(ledger.clone()));
        Self {
            ledger,
            service,
            store: InMemoryOrderStore::new(),
        }
    }

    fn saga(&self) -> TestSaga {
        self.saga_with(SagaConfig::default())
    }

    fn saga_with(&self, config: SagaConfig) -> TestSaga {
        let client: Arc<dyn InventoryClient> = self.service.clone();
        FulfillmentSaga::with_config(client, self.store.clone(), config)
    }

    fn late_saga(&self, compensate_on_cancel: bool) -> TestSaga {
        let client: Arc<dyn InventoryClient> = Arc::new(LateReserveClient {
            inner: (*self.service).clone(),
            delay: Duration::from_secs(1),
        });
        let config = SagaConfig {
            deadline: Duration::from_millis(100),
            compensate_on_cancel,
        };
        FulfillmentSaga::with_config(client, self.store.clone(), config)
    }

    async fn reserved(&self, sku: &str) -> f64 {
        self.ledger
            .stock(&Sku::new(sku))
            .await
            .unwrap()
            .unwrap()
            .reserved_quantity
            .as_f64()
    }
}

fn order(items: Vec<OrderLine>) -> OrderRequest {
    OrderRequest {
        user_id: "user-1".into(),
        user_email: "buyer@example.com".into(),
        items,
    }
}

#[tokio::test]
async fn test_happy_path_confirms_order() {
    let h = TestHarness::new();
    let saga = h.saga();

    let outcome = saga
        .create_order(order(vec![
            OrderLine::new("OLIVE-OIL-1L", 2.0, "EA"),
            OrderLine::new("FLOUR-1KG", 3.0, ""),
        ]))
        .await
        .unwrap();

    assert_eq!(outcome.status(), OrderStatus::Confirmed);
    assert!(outcome.failed_items.is_empty());
    assert_eq!(outcome.order.order.total_amount, Money::from_cents(1860));
    assert_eq!(outcome.order.order.currency, "USD");
    assert_eq!(outcome.order.items.len(), 2);

    // Stored state matches what was returned
    let order_id = outcome.order.order.id;
    let stored = saga.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.order.status, OrderStatus::Confirmed);
    assert_eq!(stored.items, outcome.order.items);

    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 2.0);
    assert_eq!(h.reserved("FLOUR-1KG").await, 3.0);
    let held = h
        .ledger
        .reservations_for_order(order_id, Some(ReservationStatus::Reserved))
        .await
        .unwrap();
    assert_eq!(held.len(), 2);
}

#[tokio::test]
async fn test_insufficient_stock_is_a_business_outcome() {
    let h = TestHarness::new();
    let saga = h.saga();

    let outcome = saga
        .create_order(order(vec![
            OrderLine::new("OLIVE-OIL-1L", 2.0, "EA"),
            OrderLine::new("SAFFRON-1G", 5.0, "EA"),
        ]))
        .await
        .unwrap();

    assert_eq!(outcome.status(), OrderStatus::FailedReservation);
    let failed = outcome
        .failed_items
        .iter()
        .find(|s| s.sku == Sku::new("SAFFRON-1G"))
        .unwrap();
    assert_eq!(failed.error_code, Some(ErrorCode::InsufficientQuantityToReserve));
    assert_eq!(failed.available_qty, 1.0);

    // Nothing was held for the item that was in stock either
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 0.0);
    assert_eq!(h.reserved("SAFFRON-1G").await, 0.0);
    assert_eq!(h.ledger.reservation_count().await, 0);

    let stored = h.store.get_order(outcome.order.order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::FailedReservation);
}

#[tokio::test]
async fn test_commit_failure_cancels_order() {
    let h = TestHarness::new();
    let saga = h.saga();
    h.ledger.set_fail_on_commit(true);

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 1.0, "")]))
        .await
        .unwrap_err();

    let order_id = match &err {
        SagaError::ReservationFailed { order_id, source } => {
            assert_eq!(source.code(), ErrorCode::DbUnavailable);
            *order_id
        }
        other => panic!("expected ReservationFailed, got {other:?}"),
    };
    assert!(err.is_infrastructure());
    assert_eq!(err.order_id(), Some(order_id));

    let stored = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reserve_is_compensated() {
    let h = TestHarness::new();
    let saga = h.late_saga(true);

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 4.0, "EA")]))
        .await
        .unwrap_err();

    let SagaError::ReservationFailed { order_id, source } = err else {
        panic!("expected ReservationFailed");
    };
    assert!(matches!(source, InventoryError::DeadlineExceeded(_)));

    let stored = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);

    // The reserve committed before the deadline hit; compensation gave it back
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 0.0);
    let records = h.ledger.reservations_for_order(order_id, None).await.unwrap();
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r.status == ReservationStatus::Released));
}

#[tokio::test(start_paused = true)]
async fn test_late_reserve_without_compensation_leaks_stock() {
    let h = TestHarness::new();
    let saga = h.late_saga(false);

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 4.0, "EA")]))
        .await
        .unwrap_err();

    let order_id = err.order_id().unwrap();
    let stored = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 4.0);
}

#[tokio::test]
async fn test_persistence_failure_reserves_nothing() {
    let h = TestHarness::new();
    let saga = h.saga();
    h.store.set_fail_on_insert(true);

    let err = saga
        .create_order(order(vec![
            OrderLine::new("OLIVE-OIL-1L", 1.0, ""),
            OrderLine::new("FLOUR-1KG", 1.0, ""),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::Persistence(_)));
    assert!(err.is_infrastructure());
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.ledger.reservation_count().await, 0);
}

#[tokio::test]
async fn test_status_update_failure_is_surfaced() {
    let h = TestHarness::new();
    let saga = h.saga();
    h.store.set_fail_on_status_update(true);

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 3.0, "")]))
        .await
        .unwrap_err();

    let SagaError::StatusUpdateFailed { order_id, status, .. } = err else {
        panic!("expected StatusUpdateFailed, got {err:?}");
    };
    assert_eq!(status, OrderStatus::Confirmed);

    // Order and ledger now disagree; both states are visible
    let stored = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 3.0);
}

#[tokio::test]
async fn test_order_settled_elsewhere_is_not_overwritten() {
    let h = TestHarness::new();
    let store = CancelledElsewhereStore::default();
    let client: Arc<dyn InventoryClient> = h.service.clone();
    let saga = FulfillmentSaga::new(client, store.clone());

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 2.0, "EA")]))
        .await
        .unwrap_err();

    let SagaError::InvalidTransition { order_id, from, to } = err else {
        panic!("expected InvalidTransition, got {err:?}");
    };
    assert_eq!(from, OrderStatus::Cancelled);
    assert_eq!(to, OrderStatus::Confirmed);

    let stored = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    // The reservation made for the cancelled order was given back
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 0.0);
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let h = TestHarness::new();
    let saga = h.saga();

    let err = saga
        .create_order(OrderRequest {
            user_id: "".into(),
            user_email: "buyer@example.com".into(),
            items: vec![],
        })
        .await
        .unwrap_err();

    let SagaError::Validation(errors) = &err else {
        panic!("expected Validation, got {err:?}");
    };
    assert_eq!(errors.fields.len(), 2);
    assert!(!err.is_infrastructure());
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_unknown_sku_and_uom_mismatch_rejected_before_persisting() {
    let h = TestHarness::new();
    let saga = h.saga();

    let err = saga
        .create_order(order(vec![
            OrderLine::new("OLIVE-OIL-1L", 1.0, ""),
            OrderLine::new("TRUFFLE-100G", 1.0, ""),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SagaError::Inventory(InventoryError::SkuNotFound { ref skus }) if skus == &vec![Sku::new("TRUFFLE-100G")]
    ));

    let err = saga
        .create_order(order(vec![OrderLine::new("ESPRESSO-250G", 1.0, "EA")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SagaError::Inventory(InventoryError::SkuUomMismatch { .. })
    ));

    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.ledger.reservation_count().await, 0);
}

#[tokio::test]
async fn test_mixed_currencies_rejected() {
    let h = TestHarness::new();
    let saga = h.saga();

    let err = saga
        .create_order(order(vec![
            OrderLine::new("OLIVE-OIL-1L", 1.0, ""),
            OrderLine::new("ESPRESSO-250G", 1.0, "BAG"),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::Validation(_)));
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_unavailable_ledger_fails_before_persisting() {
    let h = TestHarness::new();
    let saga = h.saga();
    h.ledger.set_unavailable(true);

    let err = saga
        .create_order(order(vec![OrderLine::new("OLIVE-OIL-1L", 1.0, "")]))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::Inventory(InventoryError::Unavailable(_))));
    assert!(err.is_infrastructure());
    assert_eq!(err.order_id(), None);
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sagas_never_oversell() {
    let h = TestHarness::new();
    let saga = Arc::new(h.saga());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let saga = Arc::clone(&saga);
            tokio::spawn(async move {
                saga.create_order(OrderRequest {
                    user_id: format!("user-{i}"),
                    user_email: format!("buyer{i}@example.com"),
                    items: vec![
                        OrderLine::new("OLIVE-OIL-1L", 1.0, "EA"),
                        OrderLine::new("FLOUR-1KG", 1.0, "EA"),
                    ],
                })
                .await
                .unwrap()
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await.unwrap().status() {
            OrderStatus::Confirmed => confirmed += 1,
            OrderStatus::FailedReservation => failed += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(confirmed, 10);
    assert_eq!(failed, 10);
    assert_eq!(h.reserved("OLIVE-OIL-1L").await, 10.0);
    assert_eq!(h.reserved("FLOUR-1KG").await, 10.0);
    assert_eq!(h.store.order_count().await, 20);
}
