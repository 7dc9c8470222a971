//! Batch executor against PostgreSQL row locks.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_batch -- --test-threads=1
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use inventory::{BatchExecutor, BatchResult};
use ledger::{
    OrderId, PostgresLedger, Quantity, ReservationStatus, Shortfall, Sku, StockLedger,
    StockLedgerExt, StockRecord,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresLedger::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Executor over a fresh ledger with three seeded SKUs
async fn get_test_executor() -> BatchExecutor<PostgresLedger> {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE reservations, stock_records")
        .execute(&pool)
        .await
        .unwrap();

    let ledger = PostgresLedger::new(pool);
    for record in [
        StockRecord::new("FLOUR-1KG", Quantity::units(20), "EA", 1.2, "USD"),
        StockRecord::new("OLIVE-OIL-1L", Quantity::units(10), "EA", 7.5, "USD"),
        StockRecord::new("SALT-500G", Quantity::units(1), "EA", 0.5, "USD"),
    ] {
        ledger.upsert_stock(&record).await.unwrap();
    }
    BatchExecutor::new(ledger)
}

fn items(pairs: &[(&str, i64)]) -> BTreeMap<Sku, Quantity> {
    pairs
        .iter()
        .map(|(s, q)| (Sku::new(*s), Quantity::units(*q)))
        .collect()
}

async fn reserved(ledger: &PostgresLedger, sku: &str) -> Quantity {
    ledger
        .stock(&Sku::new(sku))
        .await
        .unwrap()
        .unwrap()
        .reserved_quantity
}

#[tokio::test]
#[serial]
async fn refused_last_item_rolls_back_the_whole_batch() {
    let executor = get_test_executor().await;
    let order = OrderId::new();

    // FLOUR and OLIVE are locked and reserved before SALT is refused
    let result = executor
        .reserve_batch(
            order,
            &items(&[("FLOUR-1KG", 5), ("OLIVE-OIL-1L", 4), ("SALT-500G", 2)]),
        )
        .await;

    let BatchResult::Insufficient {
        shortfall,
        current_status,
    } = result
    else {
        panic!("expected shortfall, got {result:?}");
    };
    assert!(matches!(shortfall, Shortfall::InsufficientStock { ref sku, .. } if sku.as_str() == "SALT-500G"));
    assert_eq!(current_status.len(), 3);
    assert!(
        current_status
            .iter()
            .all(|r| r.reserved_quantity == Quantity::ZERO)
    );

    let ledger = executor.ledger();
    assert_eq!(reserved(ledger, "FLOUR-1KG").await, Quantity::ZERO);
    assert_eq!(reserved(ledger, "OLIVE-OIL-1L").await, Quantity::ZERO);
    assert!(
        ledger
            .reservations_for_order(order, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[serial]
async fn applied_batch_then_release_batch() {
    let executor = get_test_executor().await;
    let order = OrderId::new();
    let batch = items(&[("OLIVE-OIL-1L", 2), ("FLOUR-1KG", 3)]);

    let result = executor.reserve_batch(order, &batch).await;
    assert!(matches!(result, BatchResult::AllApplied(ref r) if r.len() == 2));
    assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, Quantity::units(3));

    let result = executor.release_batch(order, &batch).await;
    let BatchResult::AllApplied(records) = result else {
        panic!("expected release to apply, got {result:?}");
    };
    assert!(records.iter().all(|r| r.status == ReservationStatus::Released));
    assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, Quantity::ZERO);
    assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, Quantity::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn overlapping_batches_do_not_deadlock_or_oversell() {
    let executor = get_test_executor().await;

    let attempts = (0..8).map(|i| {
        let executor = executor.clone();
        // Alternate insertion order; the map sorts them anyway
        let batch = if i % 2 == 0 {
            items(&[("FLOUR-1KG", 2), ("OLIVE-OIL-1L", 2)])
        } else {
            items(&[("OLIVE-OIL-1L", 2), ("FLOUR-1KG", 2)])
        };
        async move { executor.reserve_batch(OrderId::new(), &batch).await }
    });
    let results = futures_util::future::join_all(attempts).await;

    let applied = results
        .iter()
        .filter(|r| matches!(r, BatchResult::AllApplied(_)))
        .count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, BatchResult::Insufficient { .. }))
        .count();
    assert_eq!(applied, 5);
    assert_eq!(refused, 3);

    assert_eq!(reserved(executor.ledger(), "OLIVE-OIL-1L").await, Quantity::units(10));
    assert_eq!(reserved(executor.ledger(), "FLOUR-1KG").await, Quantity::units(10));
}
