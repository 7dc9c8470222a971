//! Inventory service: the batch executor that applies one order's reservations as a
//! single unit, and the facade that exposes check/reserve/release with a stable
//! error vocabulary.

pub mod batch;
pub mod client;
pub mod error;
pub mod service;
pub mod wire;

pub use batch::{BatchExecutor, BatchResult};
pub use client::{DeadlineClient, InventoryClient};
pub use error::{ErrorCode, FieldError, InventoryError, Result, ValidationErrors};
pub use service::InventoryService;
pub use wire::{
    CheckStockResponse, ReservationHistory, ReservationResponse, StockItem, StockRequest,
    StockStatus,
};
