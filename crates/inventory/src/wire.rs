//! Request and response shapes of the inventory service.
//!
//! Quantities are `f64` here and become [`Quantity`] at validation; prices travel
//! with their currency code.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use common::{OrderId, Quantity, Sku};
use ledger::{ReservationRecord, ReservationStatus, StockRecord};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ValidationErrors};

/// One requested line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub sku: Sku,
    pub requested_qty_per_uom: f64,
    /// Empty means "whatever the SKU is stocked in".
    #[serde(default)]
    pub uom: String,
}

impl StockItem {
    pub fn new(sku: impl Into<Sku>, requested_qty_per_uom: f64, uom: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            requested_qty_per_uom,
            uom: uom.into(),
        }
    }
}

/// Request shared by check, reserve and release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRequest {
    pub order_id: OrderId,
    pub items: Vec<StockItem>,
}

impl StockRequest {
    pub fn new(order_id: OrderId, items: Vec<StockItem>) -> Self {
        Self { order_id, items }
    }

    /// Validates the lines and returns the requested quantity per SKU.
    ///
    /// `allow_zero` admits zero quantities, which a read-only check may carry.
    /// Quantities are rounded to micro-units; one that rounds to zero counts as zero.
    pub fn validate(&self, allow_zero: bool) -> Result<BTreeMap<Sku, Quantity>, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.items.is_empty() {
            errors.push("items", "must contain at least one item");
        }

        let mut seen = HashSet::new();
        let mut quantities = BTreeMap::new();
        for (i, item) in self.items.iter().enumerate() {
            if item.sku.is_blank() {
                errors.push(format!("items[{i}].sku"), "must not be blank");
            } else if !seen.insert(&item.sku) {
                errors.push(
                    format!("items[{i}].sku"),
                    format!("duplicate SKU {}", item.sku),
                );
            }

            let raw = item.requested_qty_per_uom;
            let quantity = Quantity::from_f64(raw).filter(|q| {
                q.is_positive() || (allow_zero && raw >= 0.0 && *q == Quantity::ZERO)
            });
            match quantity {
                Some(quantity) => {
                    quantities.insert(item.sku.clone(), quantity);
                }
                None => {
                    let expectation = if allow_zero {
                        "must be a finite non-negative number"
                    } else {
                        "must be a finite positive number"
                    };
                    errors.push(format!("items[{i}].requested_qty_per_uom"), expectation);
                }
            }
        }

        errors.into_result().map(|()| quantities)
    }

    /// The requested UOM per SKU, for lines that name one.
    pub fn requested_uoms(&self) -> impl Iterator<Item = (&Sku, &str)> {
        self.items
            .iter()
            .filter(|i| !i.uom.trim().is_empty())
            .map(|i| (&i.sku, i.uom.trim()))
    }
}

/// Current quantities of one SKU, echoed with what was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockStatus {
    pub sku: Sku,
    pub requested_qty: f64,
    pub available_qty: f64,
    pub reserved_qty: f64,
    pub total_qty: f64,
    pub uom: String,
    pub price: f64,
    pub currency: String,
    /// Set on the line that caused a reserve or release to be refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl StockStatus {
    pub fn from_record(record: &StockRecord, requested_qty: f64) -> Self {
        Self {
            sku: record.sku.clone(),
            requested_qty,
            available_qty: record.available_quantity().as_f64(),
            reserved_qty: record.reserved_quantity.as_f64(),
            total_qty: record.total_quantity.as_f64(),
            uom: record.uom.clone(),
            price: record.unit_price,
            currency: record.currency.clone(),
            error_code: None,
        }
    }

    pub fn with_error(mut self, code: ErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }
}

/// One reservation record as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationHistory {
    pub id: String,
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity: f64,
    pub uom: String,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl From<ReservationRecord> for ReservationHistory {
    fn from(record: ReservationRecord) -> Self {
        Self {
            id: record.id.to_string(),
            order_id: record.order_id,
            sku: record.sku,
            quantity: record.quantity.as_f64(),
            uom: record.uom,
            status: record.status,
            reserved_at: record.reserved_at,
            released_at: record.released_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStockResponse {
    pub items: Vec<StockStatus>,
    pub timestamp: DateTime<Utc>,
}

impl CheckStockResponse {
    /// Looks up the status of a SKU.
    pub fn get(&self, sku: &Sku) -> Option<&StockStatus> {
        self.items.iter().find(|s| &s.sku == sku)
    }
}

/// Response of reserve and release.
///
/// Exactly one of `success_items` and `failed_items` is populated, unless the
/// request had nothing to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub order_id: OrderId,
    pub success_items: Vec<ReservationHistory>,
    pub failed_items: Vec<StockStatus>,
    pub timestamp: DateTime<Utc>,
}

impl ReservationResponse {
    pub fn applied(order_id: OrderId, records: Vec<ReservationRecord>) -> Self {
        Self {
            order_id,
            success_items: records.into_iter().map(ReservationHistory::from).collect(),
            failed_items: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn refused(order_id: OrderId, failed_items: Vec<StockStatus>) -> Self {
        Self {
            order_id,
            success_items: Vec::new(),
            failed_items,
            timestamp: Utc::now(),
        }
    }

    /// True when nothing was refused.
    pub fn is_success(&self) -> bool {
        self.failed_items.is_empty()
    }
}
