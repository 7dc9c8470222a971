use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::validate_quantity;
use crate::ledger::note_shortfall;
use crate::{
    Availability, LedgerError, LedgerTransaction, OrderId, Quantity, ReleaseOutcome,
    ReservationRecord, ReservationStatus, ReserveOutcome, Result, Shortfall, Sku, StockLedger,
    StockRecord,
};

type Row = Arc<Mutex<StockRecord>>;

/// In-memory stock ledger.
///
/// Each SKU row sits behind its own async mutex, which plays the role of a
/// database row lock: a transaction acquires the row the first time it touches
/// it and keeps the guard until commit or rollback.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    rows: Arc<RwLock<HashMap<Sku, Row>>>,
    reservations: Arc<Mutex<Vec<ReservationRecord>>>,
    unavailable: Arc<AtomicBool>,
    fail_on_commit: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with the given records.
    pub fn with_stock(records: impl IntoIterator<Item = StockRecord>) -> Self {
        let rows = records
            .into_iter()
            .map(|r| (r.sku.clone(), Arc::new(Mutex::new(r))))
            .collect();
        Self {
            rows: Arc::new(RwLock::new(rows)),
            ..Self::default()
        }
    }

    /// Makes every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every commit fail, leaving the transaction rolled back.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of reservation records, in any status.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.lock().await.len()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "in-memory ledger marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn row(&self, sku: &Sku) -> Option<Row> {
        self.rows.read().await.get(sku).cloned()
    }
}

#[async_trait]
impl StockLedger for InMemoryLedger {
    async fn check_availability(&self, skus: &[Sku]) -> Result<Availability> {
        self.ensure_available()?;

        // Clone row handles first so no map lock is held while waiting on a row.
        let handles: Vec<(Sku, Option<Row>)> = {
            let rows = self.rows.read().await;
            skus.iter()
                .map(|sku| (sku.clone(), rows.get(sku).cloned()))
                .collect()
        };

        let mut availability = Availability::default();
        for (sku, handle) in handles {
            match handle {
                Some(row) => availability.found.push(row.lock().await.clone()),
                None => availability.missing.push(sku),
            }
        }
        Ok(availability)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        self.ensure_available()?;
        Ok(Box::new(InMemoryTransaction {
            ledger: self.clone(),
            locked: BTreeMap::new(),
            inserted: Vec::new(),
            updated: HashMap::new(),
        }))
    }

    async fn reservations_for_order(
        &self,
        order_id: OrderId,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<ReservationRecord>> {
        self.ensure_available()?;
        let mut records: Vec<ReservationRecord> = self
            .reservations
            .lock()
            .await
            .iter()
            .filter(|r| r.order_id == order_id && status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.reserved_at);
        Ok(records)
    }

    async fn adjust_total(&self, sku: &Sku, delta: Quantity) -> Result<StockRecord> {
        self.ensure_available()?;
        let row = self
            .row(sku)
            .await
            .ok_or_else(|| LedgerError::SkuNotFound(sku.clone()))?;
        let mut record = row.lock().await;

        let new_total = match record.total_quantity.checked_add(delta) {
            Some(total) if total >= record.reserved_quantity => total,
            _ => {
                return Err(LedgerError::InvalidAdjustment {
                    sku: sku.clone(),
                    delta,
                    reserved: record.reserved_quantity,
                });
            }
        };
        record.total_quantity = new_total;
        Ok(record.clone())
    }
}

/// A locked stock row plus the copy being mutated inside the transaction.
struct LockedRow {
    guard: OwnedMutexGuard<StockRecord>,
    staged: StockRecord,
}

struct InMemoryTransaction {
    ledger: InMemoryLedger,
    locked: BTreeMap<Sku, LockedRow>,
    inserted: Vec<ReservationRecord>,
    updated: HashMap<Uuid, ReservationRecord>,
}

impl InMemoryTransaction {
    /// Locks the row for `sku` unless this transaction already holds it.
    /// Returns false if the SKU has no record.
    async fn lock_row(&mut self, sku: &Sku) -> bool {
        if self.locked.contains_key(sku) {
            return true;
        }
        let Some(row) = self.ledger.row(sku).await else {
            return false;
        };
        let guard = row.lock_owned().await;
        let staged = guard.clone();
        self.locked.insert(sku.clone(), LockedRow { guard, staged });
        true
    }

    /// RESERVED records the order holds for a SKU, as seen from inside this transaction.
    async fn held_records(&self, order_id: OrderId, sku: &Sku) -> Vec<ReservationRecord> {
        let committed = self.ledger.reservations.lock().await;
        let mut held: Vec<ReservationRecord> = committed
            .iter()
            .filter(|r| r.order_id == order_id && &r.sku == sku)
            .map(|r| self.updated.get(&r.id).cloned().unwrap_or_else(|| r.clone()))
            .chain(
                self.inserted
                    .iter()
                    .filter(|r| r.order_id == order_id && &r.sku == sku)
                    .cloned(),
            )
            .filter(ReservationRecord::is_reserved)
            .collect();
        held.sort_by(|a, b| a.reserved_at.cmp(&b.reserved_at).then(a.id.cmp(&b.id)));
        held
    }

    fn stage_update(&mut self, record: ReservationRecord) {
        if let Some(pending) = self.inserted.iter_mut().find(|r| r.id == record.id) {
            *pending = record;
        } else {
            self.updated.insert(record.id, record);
        }
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn reserve(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReserveOutcome> {
        validate_quantity(sku, quantity)?;
        self.ledger.ensure_available()?;

        let unknown = Shortfall::UnknownSku {
            sku: sku.clone(),
            requested: quantity,
        };
        if !self.lock_row(sku).await {
            return Ok(ReserveOutcome::Insufficient(note_shortfall(unknown)));
        }
        let Some(row) = self.locked.get_mut(sku) else {
            return Ok(ReserveOutcome::Insufficient(note_shortfall(unknown)));
        };

        let available = row.staged.available_quantity();
        if quantity > available {
            return Ok(ReserveOutcome::Insufficient(note_shortfall(
                Shortfall::InsufficientStock {
                    sku: sku.clone(),
                    requested: quantity,
                    available,
                },
            )));
        }

        row.staged.reserved_quantity += quantity;
        let record =
            ReservationRecord::reserved(order_id, sku.clone(), quantity, row.staged.uom.clone());
        self.inserted.push(record.clone());
        Ok(ReserveOutcome::Reserved(record))
    }

    async fn release(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReleaseOutcome> {
        validate_quantity(sku, quantity)?;
        self.ledger.ensure_available()?;

        if !self.lock_row(sku).await {
            return Ok(ReleaseOutcome::Insufficient(note_shortfall(
                Shortfall::UnknownSku {
                    sku: sku.clone(),
                    requested: quantity,
                },
            )));
        }

        let held = self.held_records(order_id, sku).await;
        let held_quantity: Quantity = held.iter().map(|r| r.quantity).sum();
        if quantity > held_quantity {
            return Ok(ReleaseOutcome::Insufficient(note_shortfall(
                Shortfall::InsufficientReserved {
                    sku: sku.clone(),
                    requested: quantity,
                    reserved: held_quantity,
                },
            )));
        }

        if let Some(row) = self.locked.get_mut(sku) {
            row.staged.reserved_quantity =
                (row.staged.reserved_quantity - quantity).max(Quantity::ZERO);
        }

        let now = Utc::now();
        let mut remaining = quantity;
        let mut released = Vec::new();
        for mut record in held {
            if !remaining.is_positive() {
                break;
            }
            if record.quantity > remaining {
                let rest = record.split(record.quantity - remaining);
                self.inserted.push(rest);
            }
            remaining -= record.quantity;
            record.mark_released(now);
            self.stage_update(record.clone());
            released.push(record);
        }

        Ok(ReleaseOutcome::Released(released))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.ledger.fail_on_commit.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "commit failed: in-memory ledger set to fail".to_string(),
            ));
        }

        {
            let mut log = self.ledger.reservations.lock().await;
            for record in log.iter_mut() {
                if let Some(updated) = self.updated.remove(&record.id) {
                    *record = updated;
                }
            }
            log.append(&mut self.inserted);
        }

        for row in self.locked.values_mut() {
            *row.guard = row.staged.clone();
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Staged copies are discarded with the guards.
        Ok(())
    }
}
