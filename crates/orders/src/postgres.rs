use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Money, Order, OrderId, OrderItem, OrderStatus, OrderStore, OrderStoreError, Result, Sku,
};

const ORDER_COLUMNS: &str =
    "id, user_id, user_email, status, total_amount_cents, currency, created_at, updated_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
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

    fn row_to_order(row: PgRow) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            quantity_per_unit: row.try_get("quantity_per_unit")?,
            price_per_unit: Money::from_cents(row.try_get("price_per_unit_cents")?),
            uom_code: row.try_get("uom_code")?,
        })
    }

    async fn insert_item(
        tx: &mut Transaction<'static, Postgres>,
        line_no: i32,
        item: &OrderItem,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (id, order_id, line_no, sku, quantity_per_unit, price_per_unit_cents, uom_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id)
        .bind(item.order_id.as_uuid())
        .bind(line_no)
        .bind(item.sku.as_str())
        .bind(item.quantity_per_unit)
        .bind(item.price_per_unit.cents())
        .bind(&item.uom_code)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order, items), fields(order_id = %order.id, items = items.len()))]
    async fn insert_order_with_items(&self, order: &Order, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, user_email, status, total_amount_cents, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.user_id)
        .bind(&order.user_email)
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(&order.currency)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return OrderStoreError::AlreadyExists(order.id);
            }
            OrderStoreError::Database(e)
        })?;

        for (line_no, item) in (1..).zip(items) {
            if let Err(e) = Self::insert_item(&mut tx, line_no, item).await {
                tracing::warn!(sku = %item.sku, error = %e, "item insert failed, rolling back order");
                tx.rollback().await?;
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(OrderStoreError::NotFound(order_id))?;

        Self::row_to_order(row)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, sku, quantity_per_unit, price_per_unit_cents, uom_code
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }
}
