//! Stock and reservation records, and the outcomes of ledger mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LedgerError, OrderId, Quantity, Sku};

/// Authoritative quantities for one SKU.
///
/// Invariant: `0 <= reserved_quantity <= total_quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub sku: Sku,
    pub total_quantity: Quantity,
    pub reserved_quantity: Quantity,
    pub uom: String,
    pub unit_price: f64,
    pub currency: String,
}

impl StockRecord {
    /// Creates a record with nothing reserved.
    pub fn new(
        sku: impl Into<Sku>,
        total_quantity: Quantity,
        uom: impl Into<String>,
        unit_price: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.into(),
            total_quantity,
            reserved_quantity: Quantity::ZERO,
            uom: uom.into(),
            unit_price,
            currency: currency.into(),
        }
    }

    /// Sets the reserved quantity.
    pub fn with_reserved(mut self, reserved_quantity: Quantity) -> Self {
        self.reserved_quantity = reserved_quantity;
        self
    }

    /// Quantity that can still be reserved.
    pub fn available_quantity(&self) -> Quantity {
        self.total_quantity - self.reserved_quantity
    }
}

/// Lifecycle of a reservation record. Records are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Released,
}

impl ReservationStatus {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Released => "RELEASED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(ReservationStatus::Reserved),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(LedgerError::Corrupt(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// One reservation of stock for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: Quantity,
    pub uom: String,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl ReservationRecord {
    /// Creates a fresh RESERVED record.
    pub fn reserved(
        order_id: OrderId,
        sku: Sku,
        quantity: Quantity,
        uom: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            sku,
            quantity,
            uom: uom.into(),
            status: ReservationStatus::Reserved,
            reserved_at: Utc::now(),
            released_at: None,
        }
    }

    /// Returns true while the record still holds stock.
    pub fn is_reserved(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }

    /// Marks the record released at the given instant.
    pub(crate) fn mark_released(&mut self, at: DateTime<Utc>) {
        self.status = ReservationStatus::Released;
        self.released_at = Some(at);
    }

    /// Splits off `remainder` into a new RESERVED record and keeps the rest on `self`.
    pub(crate) fn split(&mut self, remainder: Quantity) -> ReservationRecord {
        let mut rest = self.clone();
        rest.id = Uuid::new_v4();
        rest.quantity = remainder;
        self.quantity -= remainder;
        rest
    }
}

/// Result of a read-only availability check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Availability {
    /// Records for the SKUs that exist.
    pub found: Vec<StockRecord>,
    /// Requested SKUs with no record.
    pub missing: Vec<Sku>,
}

impl Availability {
    /// Returns true if every requested SKU was found.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Looks up the record for a SKU.
    pub fn get(&self, sku: &Sku) -> Option<&StockRecord> {
        self.found.iter().find(|r| &r.sku == sku)
    }
}

/// Why a reserve or release was refused. A business outcome, not a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shortfall {
    /// Not enough unreserved stock.
    InsufficientStock {
        sku: Sku,
        requested: Quantity,
        available: Quantity,
    },
    /// The order does not hold that much reserved stock for the SKU.
    InsufficientReserved {
        sku: Sku,
        requested: Quantity,
        reserved: Quantity,
    },
    /// The SKU has no stock record at all.
    UnknownSku { sku: Sku, requested: Quantity },
}

impl Shortfall {
    /// The SKU that was short.
    pub fn sku(&self) -> &Sku {
        match self {
            Shortfall::InsufficientStock { sku, .. }
            | Shortfall::InsufficientReserved { sku, .. }
            | Shortfall::UnknownSku { sku, .. } => sku,
        }
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Shortfall::InsufficientStock { .. } => "insufficient_stock",
            Shortfall::InsufficientReserved { .. } => "insufficient_reserved",
            Shortfall::UnknownSku { .. } => "unknown_sku",
        }
    }
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shortfall::InsufficientStock {
                sku,
                requested,
                available,
            } => write!(
                f,
                "insufficient available quantity for SKU {sku}: requested {requested}, available {available}"
            ),
            Shortfall::InsufficientReserved {
                sku,
                requested,
                reserved,
            } => write!(
                f,
                "insufficient reserved quantity for SKU {sku}: requested {requested}, reserved {reserved}"
            ),
            Shortfall::UnknownSku { sku, requested } => {
                write!(f, "no stock record for SKU {sku} (requested {requested})")
            }
        }
    }
}

/// Outcome of a single reserve.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(ReservationRecord),
    Insufficient(Shortfall),
}

impl ReserveOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveOutcome::Reserved(_))
    }
}

/// Outcome of a single release. One release may close several records.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(Vec<ReservationRecord>),
    Insufficient(Shortfall),
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released(_))
    }
}
