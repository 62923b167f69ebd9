use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OwnerKey, ProductId, VariantId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{quantity_from_db, quantity_to_db};
use crate::{CartItem, Result, StoreError, store::CartStore};

const CART_COLUMNS: &str =
    "owner_key, product_id, variant_id, quantity, unit_price, added_at, updated_at";

/// PostgreSQL-backed cart store for signed-in users.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_item(row: PgRow) -> Result<CartItem> {
        let owner_key: String = row.try_get("owner_key")?;
        let variant_id: String = row.try_get("variant_id")?;

        Ok(CartItem {
            owner: OwnerKey::parse(&owner_key)
                .map_err(|e| StoreError::InvalidData(e.to_string()))?,
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: (!variant_id.is_empty()).then(|| VariantId::new(variant_id)),
            quantity: quantity_from_db(row.try_get("quantity")?)?,
            unit_price: Money::from_minor(row.try_get("unit_price")?),
            added_at: row.try_get("added_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Maps an absent variant to the empty-string key column.
fn variant_key(variant_id: Option<&VariantId>) -> &str {
    variant_id.map(VariantId::as_str).unwrap_or("")
}

#[async_trait]
impl CartStore for PostgresCartStore {
    async fn items(&self, owner: &OwnerKey) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE owner_key = $1 ORDER BY added_at ASC, product_id ASC, variant_id ASC"
        ))
        .bind(owner.as_key())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn find(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE owner_key = $1 AND product_id = $2 AND variant_id = $3"
        ))
        .bind(owner.as_key())
        .bind(product_id.as_str())
        .bind(variant_key(variant_id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn add_quantity(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<CartItem> {
        // Single statement so concurrent adds are summed by the database
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_items (owner_key, product_id, variant_id, quantity, unit_price, added_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (owner_key, product_id, variant_id) DO UPDATE
            SET quantity = cart_items.quantity + EXCLUDED.quantity,
                unit_price = EXCLUDED.unit_price,
                updated_at = EXCLUDED.updated_at
            RETURNING {CART_COLUMNS}
            "#
        ))
        .bind(owner.as_key())
        .bind(product_id.as_str())
        .bind(variant_key(variant_id))
        .bind(quantity_to_db(quantity)?)
        .bind(unit_price.minor())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_item(row)
    }

    async fn set_line(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cart_items
            SET quantity = $4, unit_price = $5, updated_at = $6
            WHERE owner_key = $1 AND product_id = $2 AND variant_id = $3
            "#,
        )
        .bind(owner.as_key())
        .bind(product_id.as_str())
        .bind(variant_key(variant_id))
        .bind(quantity_to_db(quantity)?)
        .bind(unit_price.minor())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM cart_items WHERE owner_key = $1 AND product_id = $2 AND variant_id = $3",
        )
        .bind(owner.as_key())
        .bind(product_id.as_str())
        .bind(variant_key(variant_id))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, owner: &OwnerKey) -> Result<usize> {
        let result = sqlx::query("DELETE FROM cart_items WHERE owner_key = $1")
            .bind(owner.as_key())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }
}
