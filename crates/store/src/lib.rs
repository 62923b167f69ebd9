//! Persistence for the commerce transaction core.
//!
//! Holds the persisted records (cart lines, orders, payments, the status
//! ledger), the [`CartStore`] and [`OrderStore`] traits, and their in-memory,
//! session-cache and PostgreSQL implementations.
//!
//! Status fields on an [`Order`] are only ever changed through
//! [`OrderStore::commit`], which applies an [`OrderChange`] atomically.

pub mod change;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod session;
pub mod store;
pub mod version;

#[cfg(test)]
mod fixtures;

pub use change::{OrderChange, OrderDetails};
pub use error::{Result, StoreError};
pub use memory::{InMemoryCartStore, InMemoryOrderStore};
pub use model::{
    Actor, Address, CartItem, NewOrder, Order, OrderItem, OrderStatus, Payment, PaymentStatus,
    StatusEntry, Totals,
};
pub use postgres::{PostgresCartStore, PostgresOrderStore};
pub use query::OrderQuery;
pub use session::SessionCartStore;
pub use store::{CartStore, OrderStore, OrderStoreExt};
pub use version::Version;
