//! HTTP API for order fulfillment and inventory.
//!
//! Provides REST endpoints for creating orders through the fulfillment saga and
//! for the inventory operations, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::{InventoryClient, InventoryService};
use ledger::{InMemoryLedger, PostgresLedger, Quantity, StockRecord};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::{FulfillmentSaga, SagaConfig};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The saga as wired by the API: both collaborators behind trait objects.
pub type Saga = FulfillmentSaga<Arc<dyn InventoryClient>, Arc<dyn OrderStore>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub inventory: Arc<dyn InventoryClient>,
    pub saga: Saga,
    /// Which storage the process runs on, reported by `/health`.
    pub backend: &'static str,
}

impl AppState {
    pub fn new(
        inventory: Arc<dyn InventoryClient>,
        orders: Arc<dyn OrderStore>,
        config: SagaConfig,
        backend: &'static str,
    ) -> Self {
        let saga = FulfillmentSaga::with_config(Arc::clone(&inventory), orders, config);
        Self {
            inventory,
            saga,
            backend,
        }
    }

    /// In-memory ledger and order store, seeded with `stock`.
    pub fn in_memory(config: SagaConfig, stock: impl IntoIterator<Item = StockRecord>) -> Self {
        let inventory = InventoryService::new(InMemoryLedger::with_stock(stock));
        Self::new(
            Arc::new(inventory),
            Arc::new(InMemoryOrderStore::new()),
            config,
            "memory",
        )
    }

    /// PostgreSQL ledger and order store sharing one pool.
    pub fn postgres(pool: PgPool, config: SagaConfig) -> Self {
        let inventory = InventoryService::new(PostgresLedger::new(pool.clone()));
        Self::new(
            Arc::new(inventory),
            Arc::new(PostgresOrderStore::new(pool)),
            config,
            "postgres",
        )
    }
}

/// Stock the in-memory backend starts with.
pub fn demo_stock() -> Vec<StockRecord> {
    vec![
        StockRecord::new("OLIVE-OIL-1L", Quantity::units(10), "EA", 7.5, "USD"),
        StockRecord::new("FLOUR-1KG", Quantity::units(50), "EA", 1.2, "USD"),
        StockRecord::new("RICE-5KG", Quantity::units(20), "BAG", 9.9, "USD"),
        StockRecord::new("SAFFRON-1G", Quantity::units(1), "EA", 12.0, "USD"),
    ]
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/inventory/check", post(routes::inventory::check))
        .route("/inventory/reserve", post(routes::inventory::reserve))
        .route("/inventory/release", post(routes::inventory::release))
        .route(
            "/inventory/orders/{id}/release",
            post(routes::inventory::release_order),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
