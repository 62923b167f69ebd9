//! Persisted records.

mod cart;
mod ledger;
mod order;
mod payment;

pub use cart::CartItem;
pub use ledger::{Actor, StatusEntry};
pub use order::{Address, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus, Totals};
pub use payment::Payment;

/// Parses a status column, mapping unknown values to `InvalidData`.
pub(crate) fn parse_status<T: std::str::FromStr>(value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::StoreError::InvalidData(format!("unknown status '{value}'")))
}
