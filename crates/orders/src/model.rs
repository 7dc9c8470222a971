//! Order, line items and the order status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Money, OrderId, OrderStoreError, Sku};

/// Status of an order.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed
///           ├──► FailedReservation
///           └──► Cancelled
/// ```
/// Every status other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Written, reservation not yet settled.
    #[default]
    Pending,

    /// Every item is reserved (terminal state).
    Confirmed,

    /// At least one item could not be reserved (terminal state).
    FailedReservation,

    /// Reservation failed for an infrastructure reason (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Returns true if an order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::Pending) && next.is_terminal()
    }

    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::FailedReservation => "FAILED_RESERVATION",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = OrderStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "FAILED_RESERVATION" => Ok(OrderStatus::FailedReservation),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(OrderStoreError::Corrupt(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// A line of an order. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: OrderId,
    pub sku: Sku,
    pub quantity_per_unit: f64,
    pub price_per_unit: Money,
    pub uom_code: String,
}

impl OrderItem {
    pub fn new(
        order_id: OrderId,
        sku: Sku,
        quantity_per_unit: f64,
        price_per_unit: Money,
        uom_code: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            sku,
            quantity_per_unit,
            price_per_unit,
            uom_code: uom_code.into(),
        }
    }

    /// Price of the whole line, rounded to the cent.
    pub fn line_total(&self) -> Money {
        self.price_per_unit.times(self.quantity_per_unit)
    }
}

/// An order header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub user_email: String,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a PENDING order whose total is the sum of its items.
    pub fn pending(
        id: OrderId,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        currency: impl Into<String>,
        items: &[OrderItem],
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            user_email: user_email.into(),
            status: OrderStatus::Pending,
            total_amount: items.iter().map(OrderItem::line_total).sum(),
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An order together with its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}
