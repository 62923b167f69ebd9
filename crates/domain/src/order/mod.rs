//! Order materialization and lifecycle.

mod commands;
mod service;

pub use commands::{AdvanceFulfillment, CancelOrder, CheckoutRequest, OrderUpdate};
pub use service::OrderService;

use chrono::{DateTime, Utc};
use common::OrderId;

/// Builds the human-readable order number `ORD-YYYYMMDD-XXXXXXXXXXXX`.
///
/// The suffix is the first twelve hex digits of the order id.
pub fn order_number(id: OrderId, created_at: DateTime<Utc>) -> String {
    let hex = id.as_uuid().simple().to_string();
    format!(
        "ORD-{}-{}",
        created_at.format("%Y%m%d"),
        hex[..12].to_uppercase()
    )
}
