//! Order fulfillment saga constants.

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Step name: Read current stock for every requested SKU.
pub const STEP_CHECK_AVAILABILITY: &str = "check_availability";

/// Step name: Write the order and its items as PENDING.
pub const STEP_PERSIST_ORDER: &str = "persist_order";

/// Step name: Reserve every item as one batch.
pub const STEP_RESERVE_STOCK: &str = "reserve_stock";

/// Step name: Set the terminal order status.
pub const STEP_FINALIZE_STATUS: &str = "finalize_status";

/// Compensation: give back whatever the order still holds.
pub const STEP_RELEASE_ORDER: &str = "release_order";
