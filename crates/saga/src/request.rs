use std::collections::HashSet;

use common::{OrderId, Sku};
use inventory::{StockItem, StockRequest, ValidationErrors};
use serde::{Deserialize, Serialize};

/// One line of an order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub quantity: f64,
    /// Empty means the SKU's stocked UOM.
    #[serde(default)]
    pub uom: String,
}

impl OrderLine {
    pub fn new(sku: impl Into<Sku>, quantity: f64, uom: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            uom: uom.into(),
        }
    }
}

/// A request to create and fulfill an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: String,
    pub user_email: String,
    pub items: Vec<OrderLine>,
}

impl OrderRequest {
    /// Checks the request before any remote call is made.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.user_id.trim().is_empty() {
            errors.push("user_id", "must not be blank");
        }
        if !looks_like_email(&self.user_email) {
            errors.push("user_email", "must be an email address");
        }
        if self.items.is_empty() {
            errors.push("items", "must contain at least one item");
        }

        let mut seen = HashSet::new();
        for (i, line) in self.items.iter().enumerate() {
            if line.sku.is_blank() {
                errors.push(format!("items[{i}].sku"), "must not be blank");
            } else if !seen.insert(&line.sku) {
                errors.push(format!("items[{i}].sku"), format!("duplicate SKU {}", line.sku));
            }
            if !(line.quantity.is_finite() && line.quantity > 0.0) {
                errors.push(
                    format!("items[{i}].quantity"),
                    "must be a finite positive number",
                );
            }
        }

        errors.into_result()
    }

    /// The inventory request for this order.
    pub fn stock_request(&self, order_id: OrderId) -> StockRequest {
        StockRequest::new(
            order_id,
            self.items
                .iter()
                .map(|l| StockItem::new(l.sku.clone(), l.quantity, l.uom.clone()))
                .collect(),
        )
    }
}

fn looks_like_email(s: &str) -> bool {
    let s = s.trim();
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}
