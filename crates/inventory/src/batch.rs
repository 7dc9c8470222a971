//! All-or-nothing application of one order's per-SKU reservations or releases.

use std::collections::BTreeMap;
use std::time::Instant;

use common::{OrderId, Quantity, Sku};
use ledger::{
    LedgerError, ReleaseOutcome, ReservationRecord, ReserveOutcome, Shortfall, StockLedger,
    StockRecord,
};

/// Outcome of a batch. Callers never observe a partially applied batch.
#[derive(Debug)]
pub enum BatchResult {
    /// Every item was applied and committed.
    AllApplied(Vec<ReservationRecord>),
    /// An item was refused; nothing in the batch was kept.
    Insufficient {
        /// The item that aborted the batch.
        shortfall: Shortfall,
        /// Current records of every SKU in the batch, read after the rollback.
        current_status: Vec<StockRecord>,
    },
    /// Storage failed; the batch was rolled back (or its commit failed).
    InfrastructureFailure(LedgerError),
}

impl BatchResult {
    fn label(&self) -> &'static str {
        match self {
            BatchResult::AllApplied(_) => "applied",
            BatchResult::Insufficient { .. } => "insufficient",
            BatchResult::InfrastructureFailure(_) => "infrastructure_failure",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchOp {
    Reserve,
    Release,
}

impl BatchOp {
    fn as_str(&self) -> &'static str {
        match self {
            BatchOp::Reserve => "reserve",
            BatchOp::Release => "release",
        }
    }
}

/// Runs batches against a ledger.
///
/// Items are taken as a `BTreeMap`, so they are always applied in SKU order and
/// two batches over overlapping SKUs lock rows in the same sequence.
#[derive(Clone)]
pub struct BatchExecutor<L> {
    ledger: L,
}

impl<L: StockLedger> BatchExecutor<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Reserves every item for the order, or none of them.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve_batch(
        &self,
        order_id: OrderId,
        items: &BTreeMap<Sku, Quantity>,
    ) -> BatchResult {
        self.run(BatchOp::Reserve, order_id, items).await
    }

    /// Releases every item for the order, or none of them.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn release_batch(
        &self,
        order_id: OrderId,
        items: &BTreeMap<Sku, Quantity>,
    ) -> BatchResult {
        self.run(BatchOp::Release, order_id, items).await
    }

    async fn run(
        &self,
        op: BatchOp,
        order_id: OrderId,
        items: &BTreeMap<Sku, Quantity>,
    ) -> BatchResult {
        let started = Instant::now();
        let result = match self.apply(op, order_id, items).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(%order_id, op = op.as_str(), error = %e, "batch failed");
                BatchResult::InfrastructureFailure(e)
            }
        };

        metrics::counter!(
            "inventory_batches_total",
            "op" => op.as_str(),
            "outcome" => result.label()
        )
        .increment(1);
        metrics::histogram!("inventory_batch_duration_seconds", "op" => op.as_str())
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn apply(
        &self,
        op: BatchOp,
        order_id: OrderId,
        items: &BTreeMap<Sku, Quantity>,
    ) -> Result<BatchResult, LedgerError> {
        if items.is_empty() {
            return Ok(BatchResult::AllApplied(Vec::new()));
        }

        // Dropping `tx` on an early return rolls it back.
        let mut tx = self.ledger.begin().await?;
        let mut applied = Vec::with_capacity(items.len());

        for (sku, &quantity) in items {
            let shortfall = match op {
                BatchOp::Reserve => match tx.reserve(order_id, sku, quantity).await? {
                    ReserveOutcome::Reserved(record) => {
                        applied.push(record);
                        None
                    }
                    ReserveOutcome::Insufficient(shortfall) => Some(shortfall),
                },
                BatchOp::Release => match tx.release(order_id, sku, quantity).await? {
                    ReleaseOutcome::Released(records) => {
                        applied.extend(records);
                        None
                    }
                    ReleaseOutcome::Insufficient(shortfall) => Some(shortfall),
                },
            };

            if let Some(shortfall) = shortfall {
                tx.rollback().await?;
                tracing::info!(%order_id, op = op.as_str(), %shortfall, "batch refused");

                // The refusal is already final here, but if this read fails the
                // batch is reported as InfrastructureFailure, not Insufficient.
                let skus: Vec<Sku> = items.keys().cloned().collect();
                let current_status = self.ledger.check_availability(&skus).await?.found;
                return Ok(BatchResult::Insufficient {
                    shortfall,
                    current_status,
                });
            }
        }

        tx.commit().await?;
        tracing::debug!(%order_id, op = op.as_str(), records = applied.len(), "batch committed");
        Ok(BatchResult::AllApplied(applied))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ledger::{
        Availability, InMemoryLedger, LedgerTransaction, ReservationStatus, StockLedgerExt,
    };

    use super::*;

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::with_stock([
            StockRecord::new("FLOUR-1KG", Quantity::units(20), "EA", 1.2, "USD"),
            StockRecord::new("OLIVE-OIL-1L", Quantity::units(10), "EA", 7.5, "USD"),
            StockRecord::new("SALT-500G", Quantity::units(1), "EA", 0.5, "USD"),
        ])
    }

    fn items(pairs: &[(&str, f64)]) -> BTreeMap<Sku, Quantity> {
        pairs
            .iter()
            .map(|(s, q)| (Sku::new(*s), Quantity::from_f64(*q).unwrap()))
            .collect()
    }

    async fn reserved(ledger: &InMemoryLedger, sku: &str) -> f64 {
        ledger
            .stock(&Sku::new(sku))
            .await
            .unwrap()
            .unwrap()
            .reserved_quantity
            .as_f64()
    }

    /// Mutates normally but cannot be read.
    struct UnreadableLedger(InMemoryLedger);

    #[async_trait]
    impl StockLedger for UnreadableLedger {
        async fn check_availability(&self, _skus: &[Sku]) -> ledger::Result<Availability> {
            Err(LedgerError::Unavailable("reads failing".into()))
        }

        async fn begin(&self) -> ledger::Result<Box<dyn LedgerTransaction>> {
            self.0.begin().await
        }

        async fn reservations_for_order(
            &self,
            order_id: OrderId,
            status: Option<ReservationStatus>,
        ) -> ledger::Result<Vec<ReservationRecord>> {
            self.0.reservations_for_order(order_id, status).await
        }

        async fn adjust_total(&self, sku: &Sku, delta: Quantity) -> ledger::Result<StockRecord> {
            self.0.adjust_total(sku, delta).await
        }
    }

    #[tokio::test]
    async fn all_items_reserved_together() {
        let executor = BatchExecutor::new(ledger());
        let order = OrderId::new();

        let result = executor
            .reserve_batch(order, &items(&[("OLIVE-OIL-1L", 2.0), ("FLOUR-1KG", 3.0)]))
            .await;

        let BatchResult::AllApplied(records) = result else {
            panic!("expected batch to apply, got {result:?}");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sku, Sku::new("FLOUR-1KG"));
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 2.0);
        assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, 3.0);
    }

    #[tokio::test]
    async fn failing_item_rolls_back_earlier_items() {
        let executor = BatchExecutor::new(ledger());
        let order = OrderId::new();

        // FLOUR and OLIVE sort before SALT, so both are applied before the refusal.
        let result = executor
            .reserve_batch(
                order,
                &items(&[("FLOUR-1KG", 5.0), ("OLIVE-OIL-1L", 4.0), ("SALT-500G", 2.0)]),
            )
            .await;

        let BatchResult::Insufficient {
            shortfall,
            current_status,
        } = result
        else {
            panic!("expected shortfall, got {result:?}");
        };
        assert_eq!(shortfall.sku(), &Sku::new("SALT-500G"));
        assert_eq!(current_status.len(), 3);
        assert!(
            current_status
                .iter()
                .all(|r| r.reserved_quantity == Quantity::ZERO)
        );

        assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, 0.0);
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 0.0);
        assert!(
            executor
                .ledger()
                .reservations_for_order(order, None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn release_batch_restores_quantities() {
        let executor = BatchExecutor::new(ledger());
        let order = OrderId::new();
        let batch = items(&[("OLIVE-OIL-1L", 2.0), ("FLOUR-1KG", 3.0)]);

        executor.reserve_batch(order, &batch).await;
        let result = executor.release_batch(order, &batch).await;

        let BatchResult::AllApplied(records) = result else {
            panic!("expected release to apply, got {result:?}");
        };
        assert!(records.iter().all(|r| r.status == ReservationStatus::Released));
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 0.0);
        assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, 0.0);
    }

    #[tokio::test]
    async fn release_more_than_held_is_refused_atomically() {
        let executor = BatchExecutor::new(ledger());
        let order = OrderId::new();
        executor
            .reserve_batch(order, &items(&[("OLIVE-OIL-1L", 2.0), ("FLOUR-1KG", 3.0)]))
            .await;

        let result = executor
            .release_batch(order, &items(&[("FLOUR-1KG", 3.0), ("OLIVE-OIL-1L", 5.0)]))
            .await;

        assert!(matches!(
            result,
            BatchResult::Insufficient {
                shortfall: Shortfall::InsufficientReserved { .. },
                ..
            }
        ));
        assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, 3.0);
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 2.0);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_as_infrastructure() {
        let ledger = ledger();
        ledger.set_fail_on_commit(true);
        let executor = BatchExecutor::new(ledger);

        let result = executor
            .reserve_batch(OrderId::new(), &items(&[("OLIVE-OIL-1L", 1.0)]))
            .await;
        assert!(matches!(result, BatchResult::InfrastructureFailure(_)));

        executor.ledger().set_fail_on_commit(false);
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 0.0);
    }

    #[tokio::test]
    async fn failed_status_read_after_refusal_is_infrastructure() {
        let inner = ledger();
        let executor = BatchExecutor::new(UnreadableLedger(inner.clone()));

        let result = executor
            .reserve_batch(
                OrderId::new(),
                &items(&[("OLIVE-OIL-1L", 1.0), ("SALT-500G", 2.0)]),
            )
            .await;

        assert!(matches!(
            result,
            BatchResult::InfrastructureFailure(LedgerError::Unavailable(_))
        ));
        // The rollback itself went through
        assert_eq!(reserved(&inner, "OLIVE-OIL-1L").await, 0.0);
        assert_eq!(inner.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn fractional_release_batch_closes_every_record() {
        let executor = BatchExecutor::new(ledger());
        let order = OrderId::new();

        executor
            .reserve_batch(order, &items(&[("OLIVE-OIL-1L", 0.1)]))
            .await;
        executor
            .reserve_batch(order, &items(&[("OLIVE-OIL-1L", 0.2)]))
            .await;
        let result = executor
            .release_batch(order, &items(&[("OLIVE-OIL-1L", 0.3)]))
            .await;

        assert!(matches!(result, BatchResult::AllApplied(ref r) if r.len() == 2));
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 0.0);
        let open = executor
            .ledger()
            .reservations_for_order(order, Some(ReservationStatus::Reserved))
            .await
            .unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_trivially_applied() {
        let executor = BatchExecutor::new(ledger());
        let result = executor.reserve_batch(OrderId::new(), &BTreeMap::new()).await;
        assert!(matches!(result, BatchResult::AllApplied(ref r) if r.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_batches_do_not_deadlock_or_oversell() {
        let executor = BatchExecutor::new(ledger());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = executor.clone();
                // Alternate insertion order; the map sorts them anyway.
                let batch = if i % 2 == 0 {
                    items(&[("FLOUR-1KG", 2.0), ("OLIVE-OIL-1L", 2.0)])
                } else {
                    items(&[("OLIVE-OIL-1L", 2.0), ("FLOUR-1KG", 2.0)])
                };
                tokio::spawn(async move { executor.reserve_batch(OrderId::new(), &batch).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), BatchResult::AllApplied(_)) {
                applied += 1;
            }
        }

        assert_eq!(applied, 5);
        assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, 10.0);
        assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, 10.0);
    }
}
