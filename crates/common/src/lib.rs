//! Shared identifiers and value types for the commerce transaction core.

pub mod config;
pub mod ids;
pub mod money;

pub use config::ConfigError;
pub use ids::{
    OrderId, OwnerKey, OwnerKeyParseError, PaymentId, ProductId, SessionId, UserId, VariantId,
};
pub use money::Money;
