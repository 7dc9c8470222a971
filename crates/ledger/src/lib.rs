//! Stock ledger: the only component allowed to mutate reserved and total quantities.
//!
//! Every check-then-mutate runs inside a [`LedgerTransaction`] that holds a lock on
//! each touched SKU row until commit or rollback, so concurrent reservations against
//! the same SKU serialize and can never oversell.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod postgres;

pub use common::{OrderId, Quantity, Sku};
pub use error::{LedgerError, Result};
pub use ledger::{LedgerTransaction, StockLedger, StockLedgerExt};
pub use memory::InMemoryLedger;
pub use model::{
    Availability, ReleaseOutcome, ReservationRecord, ReservationStatus, ReserveOutcome, Shortfall,
    StockRecord,
};
pub use postgres::PostgresLedger;
