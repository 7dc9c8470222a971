pub mod inventory;
pub mod ops;
pub mod orders;

use common::OrderId;

use crate::error::ApiError;

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
