//! PostgreSQL-backed stores.

mod cart;
mod order;

pub use cart::PostgresCartStore;
pub use order::PostgresOrderStore;

use sqlx::PgPool;

use crate::{Result, StoreError};

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Converts a quantity for an `INTEGER` column.
fn quantity_to_db(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::InvalidData(format!("quantity {quantity} out of range")))
}

/// Converts a `LIMIT` or `OFFSET` bound for a `BIGINT` parameter.
fn bound_to_db(name: &str, value: usize) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{name} {value} out of range")))
}

fn quantity_from_db(quantity: i32) -> Result<u32> {
    u32::try_from(quantity)
        .map_err(|_| StoreError::InvalidData(format!("stored quantity {quantity} is negative")))
}
