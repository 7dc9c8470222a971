use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::error::validate_quantity;
use crate::ledger::note_shortfall;
use crate::{
    Availability, LedgerError, LedgerTransaction, OrderId, Quantity, ReleaseOutcome,
    ReservationRecord, ReservationStatus, ReserveOutcome, Result, Shortfall, Sku, StockLedger,
    StockRecord,
};

const STOCK_COLUMNS: &str =
    "sku, total_quantity, reserved_quantity, uom, unit_price, currency";
const RESERVATION_COLUMNS: &str =
    "id, order_id, sku, quantity, uom, status, reserved_at, released_at";

/// PostgreSQL-backed stock ledger.
///
/// Quantity columns are `BIGINT` micro-units, see [`Quantity::micros`].
///
/// Row locks are taken with `SELECT ... FOR UPDATE` on `stock_records`, so the
/// read of the available quantity and the write that consumes it cannot interleave
/// with another transaction on the same SKU.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces the record for a SKU.
    pub async fn upsert_stock(&self, record: &StockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_records (sku, total_quantity, reserved_quantity, uom, unit_price, currency)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sku) DO UPDATE SET
                total_quantity = EXCLUDED.total_quantity,
                reserved_quantity = EXCLUDED.reserved_quantity,
                uom = EXCLUDED.uom,
                unit_price = EXCLUDED.unit_price,
                currency = EXCLUDED.currency,
                updated_at = NOW()
            "#,
        )
        .bind(record.sku.as_str())
        .bind(record.total_quantity.micros())
        .bind(record.reserved_quantity.micros())
        .bind(&record.uom)
        .bind(record.unit_price)
        .bind(&record.currency)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_stock(row: PgRow) -> Result<StockRecord> {
        Ok(StockRecord {
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            total_quantity: Quantity::from_micros(row.try_get("total_quantity")?),
            reserved_quantity: Quantity::from_micros(row.try_get("reserved_quantity")?),
            uom: row.try_get("uom")?,
            unit_price: row.try_get("unit_price")?,
            currency: row.try_get("currency")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<ReservationRecord> {
        Ok(ReservationRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            quantity: Quantity::from_micros(row.try_get("quantity")?),
            uom: row.try_get("uom")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            reserved_at: row.try_get("reserved_at")?,
            released_at: row.try_get("released_at")?,
        })
    }
}

#[async_trait]
impl StockLedger for PostgresLedger {
    async fn check_availability(&self, skus: &[Sku]) -> Result<Availability> {
        let keys: Vec<String> = skus.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE sku = ANY($1)"
        ))
        .bind(&keys)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(Self::row_to_stock)
            .collect::<Result<Vec<_>>>()?;

        // Keep the caller's order and report the gaps.
        let mut availability = Availability::default();
        for sku in skus {
            match records.iter().find(|r| &r.sku == sku) {
                Some(record) => availability.found.push(record.clone()),
                None => availability.missing.push(sku.clone()),
            }
        }
        Ok(availability)
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn reservations_for_order(
        &self,
        order_id: OrderId,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<ReservationRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE order_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY reserved_at ASC, id ASC
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn adjust_total(&self, sku: &Sku, delta: Quantity) -> Result<StockRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE sku = $1 FOR UPDATE"
        ))
        .bind(sku.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::SkuNotFound(sku.clone()))?;
        let mut record = Self::row_to_stock(row)?;

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

        sqlx::query(
            "UPDATE stock_records SET total_quantity = $2, updated_at = NOW() WHERE sku = $1",
        )
        .bind(sku.as_str())
        .bind(new_total.micros())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        record.total_quantity = new_total;
        Ok(record)
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn lock_stock(&mut self, sku: &Sku) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records WHERE sku = $1 FOR UPDATE"
        ))
        .bind(sku.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(PostgresLedger::row_to_stock).transpose()
    }

    async fn insert_reservation(&mut self, record: &ReservationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, order_id, sku, quantity, uom, status, reserved_at, released_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.order_id.as_uuid())
        .bind(record.sku.as_str())
        .bind(record.quantity.micros())
        .bind(&record.uom)
        .bind(record.status.as_str())
        .bind(record.reserved_at)
        .bind(record.released_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn reserve(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReserveOutcome> {
        validate_quantity(sku, quantity)?;

        let Some(stock) = self.lock_stock(sku).await? else {
            return Ok(ReserveOutcome::Insufficient(note_shortfall(
                Shortfall::UnknownSku {
                    sku: sku.clone(),
                    requested: quantity,
                },
            )));
        };

        let available = stock.available_quantity();
        if quantity > available {
            return Ok(ReserveOutcome::Insufficient(note_shortfall(
                Shortfall::InsufficientStock {
                    sku: sku.clone(),
                    requested: quantity,
                    available,
                },
            )));
        }

        sqlx::query(
            r#"
            UPDATE stock_records
            SET reserved_quantity = reserved_quantity + $2, updated_at = NOW()
            WHERE sku = $1
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity.micros())
        .execute(&mut *self.tx)
        .await?;

        let record = ReservationRecord::reserved(order_id, sku.clone(), quantity, stock.uom);
        self.insert_reservation(&record).await?;
        Ok(ReserveOutcome::Reserved(record))
    }

    async fn release(
        &mut self,
        order_id: OrderId,
        sku: &Sku,
        quantity: Quantity,
    ) -> Result<ReleaseOutcome> {
        validate_quantity(sku, quantity)?;

        if self.lock_stock(sku).await?.is_none() {
            return Ok(ReleaseOutcome::Insufficient(note_shortfall(
                Shortfall::UnknownSku {
                    sku: sku.clone(),
                    requested: quantity,
                },
            )));
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM reservations
            WHERE order_id = $1 AND sku = $2 AND status = 'RESERVED'
            ORDER BY reserved_at ASC, id ASC
            FOR UPDATE
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(sku.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        let held = rows
            .into_iter()
            .map(PostgresLedger::row_to_reservation)
            .collect::<Result<Vec<_>>>()?;

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

        sqlx::query(
            r#"
            UPDATE stock_records
            SET reserved_quantity = GREATEST(reserved_quantity - $2, 0), updated_at = NOW()
            WHERE sku = $1
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity.micros())
        .execute(&mut *self.tx)
        .await?;

        let now = Utc::now();
        let mut remaining = quantity;
        let mut released = Vec::new();
        for mut record in held {
            if !remaining.is_positive() {
                break;
            }
            if record.quantity > remaining {
                let rest = record.split(record.quantity - remaining);
                self.insert_reservation(&rest).await?;
            }
            remaining -= record.quantity;
            record.mark_released(now);

            sqlx::query(
                r#"
                UPDATE reservations
                SET quantity = $2, status = $3, released_at = $4
                WHERE id = $1
                "#,
            )
            .bind(record.id)
            .bind(record.quantity.micros())
            .bind(record.status.as_str())
            .bind(record.released_at)
            .execute(&mut *self.tx)
            .await?;

            released.push(record);
        }

        Ok(ReleaseOutcome::Released(released))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
