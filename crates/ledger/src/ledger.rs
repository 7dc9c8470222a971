use async_trait::async_trait;

use crate::{
    Availability, OrderId, ReleaseOutcome, ReservationRecord, ReservationStatus, ReserveOutcome,
    Quantity, Result, Shortfall, Sku, StockRecord,
};

/// A unit of work against the ledger.
///
/// The first reserve or release that touches a SKU locks its stock row; the lock
/// is held until [`commit`](LedgerTransaction::commit) or
/// [`rollback`](LedgerTransaction::rollback). Dropping an uncommitted transaction
/// rolls it back. Callers that touch several SKUs must do so in a fixed order
/// (sorted by SKU) so two transactions cannot wait on each other.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Reserves `quantity` of `sku` for the order if that much is available.
    ///
    /// On a shortfall nothing is mutated and the shortfall is returned as data.
    async fn reserve(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReserveOutcome>;

    /// Releases `quantity` of `sku` previously reserved by the order.
    ///
    /// RESERVED records are consumed oldest first and marked RELEASED. Fails with
    /// a shortfall if the order holds less than `quantity` for the SKU.
    async fn release(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReleaseOutcome>;

    /// Makes every mutation in the transaction durable and releases the row locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every mutation in the transaction and releases the row locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Core trait for stock ledger implementations.
///
/// The ledger is the single source of truth for stock quantities; there is no
/// cache in front of it. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Reads the current records for the given SKUs. Never mutates.
    ///
    /// Unknown SKUs are reported in [`Availability::missing`], not as an error.
    async fn check_availability(&self, skus: &[Sku]) -> Result<Availability>;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Returns the reservation history for an order, oldest first.
    ///
    /// When `status` is given only records in that status are returned.
    async fn reservations_for_order(
        &self,
        order_id: OrderId,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<ReservationRecord>>;

    /// Adds `delta` (which may be negative) to the total quantity of a SKU.
    ///
    /// Refuses to leave the total below the reserved quantity.
    async fn adjust_total(&self, sku: &Sku, delta: Quantity) -> Result<StockRecord>;
}

/// Extension trait providing single-SKU operations on top of transactions.
#[async_trait]
pub trait StockLedgerExt: StockLedger {
    /// Reserves one SKU in its own transaction.
    ///
    /// Commits when the reservation succeeds and rolls back on a shortfall.
    async fn reserve(
        &self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReserveOutcome> {
        let mut tx = self.begin().await?;
        let outcome = tx.reserve(order_id, sku, quantity).await?;
        if outcome.is_reserved() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    /// Releases one SKU in its own transaction.
    async fn release(
        &self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReleaseOutcome> {
        let mut tx = self.begin().await?;
        let outcome = tx.release(order_id, sku, quantity).await?;
        if outcome.is_released() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    /// Returns the record for a single SKU, if any.
    async fn stock(&self, sku: &Sku) -> Result<Option<StockRecord>> {
        let availability = self.check_availability(std::slice::from_ref(sku)).await?;
        Ok(availability.found.into_iter().next())
    }
}

// Blanket implementation for all StockLedger implementations
impl<T: StockLedger + ?Sized> StockLedgerExt for T {}

/// Logs and counts a refused mutation before it is handed back to the caller.
pub(crate) fn note_shortfall(shortfall: Shortfall) -> Shortfall {
    metrics::counter!("ledger_shortfalls_total", "kind" => shortfall.kind()).increment(1);
    tracing::debug!(sku = %shortfall.sku(), kind = shortfall.kind(), "ledger refused mutation");
    shortfall
}
