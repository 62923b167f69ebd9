use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, ProductId, VariantId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tracing::warn;
use uuid::Uuid;

use super::{bound_to_db, quantity_from_db, quantity_to_db};
use crate::{
    Actor, Order, OrderChange, OrderItem, OrderQuery, Payment, Result, StatusEntry, StoreError,
    Totals, Version, model::parse_status, store::OrderStore,
};

const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, currency, \
     subtotal, tax, shipping, discount, total, shipping_method, shipping_address, \
     billing_address, notes, version, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "order_id, product_id, variant_id, sku, name, quantity, unit_price, line_total";

const PAYMENT_COLUMNS: &str = "id, order_id, gateway_order_id, gateway_payment_id, amount, \
     currency, status, failure_reason, failure_code, refund_id, created_at, updated_at, processed_at";

const ENTRY_COLUMNS: &str =
    "id, order_id, status, payment_status, comment, actor, reference, created_at";

/// PostgreSQL-backed order store.
///
/// Each commit runs in one transaction that locks the order row, checks its
/// version and writes the order, its payments and ledger entries together.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        super::run_migrations(&self.pool).await
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let totals = Totals {
            subtotal: Money::from_minor(row.try_get("subtotal")?),
            tax: Money::from_minor(row.try_get("tax")?),
            shipping: Money::from_minor(row.try_get("shipping")?),
            discount: Money::from_minor(row.try_get("discount")?),
            total: Money::from_minor(row.try_get("total")?),
        };
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            order_number: row.try_get("order_number")?,
            user_id: row
                .try_get::<Option<Uuid>, _>("user_id")?
                .map(common::UserId::from_uuid),
            status: parse_status(&status)?,
            payment_status: parse_status(&payment_status)?,
            currency: row.try_get("currency")?,
            totals,
            shipping_method: row.try_get("shipping_method")?,
            shipping_address: serde_json::from_value(row.try_get("shipping_address")?)?,
            billing_address: serde_json::from_value(row.try_get("billing_address")?)?,
            notes: row.try_get("notes")?,
            items,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            variant_id: row
                .try_get::<Option<String>, _>("variant_id")?
                .map(VariantId::new),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            quantity: quantity_from_db(row.try_get("quantity")?)?,
            unit_price: Money::from_minor(row.try_get("unit_price")?),
            line_total: Money::from_minor(row.try_get("line_total")?),
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            gateway_order_id: row.try_get("gateway_order_id")?,
            gateway_payment_id: row.try_get("gateway_payment_id")?,
            amount: Money::from_minor(row.try_get("amount")?),
            currency: row.try_get("currency")?,
            status: parse_status(&status)?,
            failure_reason: row.try_get("failure_reason")?,
            failure_code: row.try_get("failure_code")?,
            refund_id: row.try_get("refund_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<StatusEntry> {
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;
        let actor: String = row.try_get("actor")?;

        Ok(StatusEntry {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            status: parse_status(&status)?,
            payment_status: parse_status(&payment_status)?,
            comment: row.try_get("comment")?,
            actor: Actor::parse(&actor)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown actor '{actor}'")))?,
            reference: row.try_get("reference")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Loads item snapshots for a set of orders, grouped by order.
    async fn load_items(
        conn: &mut PgConnection,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position"
        ))
        .bind(order_ids)
        .fetch_all(conn)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    async fn rows_to_orders(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<std::result::Result<_, _>>()?;
        let mut items = Self::load_items(conn, &ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn payments_in(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(conn)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn insert_entry(conn: &mut PgConnection, entry: &StatusEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_status_history (id, order_id, status, payment_status, comment, actor, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.order_id.as_uuid())
        .bind(entry.status.as_str())
        .bind(entry.payment_status.as_str())
        .bind(&entry.comment)
        .bind(entry.actor.as_str())
        .bind(&entry.reference)
        .bind(entry.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn upsert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, gateway_order_id, gateway_payment_id, amount, currency, status,
                                  failure_reason, failure_code, refund_id, created_at, updated_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE
            SET gateway_order_id = EXCLUDED.gateway_order_id,
                gateway_payment_id = EXCLUDED.gateway_payment_id,
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                failure_code = EXCLUDED.failure_code,
                refund_id = EXCLUDED.refund_id,
                updated_at = EXCLUDED.updated_at,
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id)
        .bind(payment.amount.minor())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(&payment.failure_code)
        .bind(&payment.refund_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.processed_at)
        .execute(conn)
        .await
        .map_err(|e| {
            // Unique gateway ids and the one-open-payment index
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::InvalidChange(format!(
                    "payment {} violates {}",
                    payment.id,
                    db_err.constraint().unwrap_or("a unique constraint")
                ));
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: &Order, entry: StatusEntry) -> Result<()> {
        if entry.order_id != order.id() {
            return Err(StoreError::InvalidChange(
                "creation entry belongs to another order".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let totals = order.totals();

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, status, payment_status, currency,
                                subtotal, tax, shipping, discount, total, shipping_method,
                                shipping_address, billing_address, notes, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.order_number())
        .bind(order.user_id().map(|u| u.as_uuid()))
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(order.currency())
        .bind(totals.subtotal.minor())
        .bind(totals.tax.minor())
        .bind(totals.shipping.minor())
        .bind(totals.discount.minor())
        .bind(totals.total.minor())
        .bind(order.shipping_method())
        .bind(serde_json::to_value(order.shipping_address())?)
        .bind(serde_json::to_value(order.billing_address())?)
        .bind(order.notes())
        .bind(order.version().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(order.order_number().to_string());
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, variant_id, sku, name, quantity, unit_price, line_total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(i32::try_from(position).map_err(|_| {
                StoreError::InvalidData(format!("item position {position} out of range"))
            })?)
            .bind(item.product_id.as_str())
            .bind(item.variant_id.as_ref().map(|v| v.as_str()))
            .bind(&item.sku)
            .bind(&item.name)
            .bind(quantity_to_db(item.quantity)?)
            .bind(item.unit_price.minor())
            .bind(item.line_total.minor())
            .execute(&mut *tx)
            .await?;
        }

        Self::insert_entry(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_all(&mut *conn)
            .await?;

        Ok(Self::rows_to_orders(&mut conn, rows).await?.into_iter().next())
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"
        ))
        .bind(order_number)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Self::rows_to_orders(&mut conn, rows).await?.into_iter().next())
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<Order>> {
        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.user_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND user_id = ${param_count}"));
        }
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.payment_status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND payment_status = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, order_number DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        // Bind parameters in the same order
        let mut q = sqlx::query(&sql);
        if let Some(user_id) = query.user_id {
            q = q.bind(user_id.as_uuid());
        }
        if let Some(ref statuses) = query.statuses {
            let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            q = q.bind(names);
        }
        if let Some(payment_status) = query.payment_status {
            q = q.bind(payment_status.as_str());
        }
        if let Some(from) = query.from_timestamp {
            q = q.bind(from);
        }
        if let Some(to) = query.to_timestamp {
            q = q.bind(to);
        }
        if let Some(limit) = query.limit {
            q = q.bind(bound_to_db("limit", limit)?);
        }
        if let Some(offset) = query.offset {
            q = q.bind(bound_to_db("offset", offset)?);
        }

        let mut conn = self.pool.acquire().await?;
        let rows = q.fetch_all(&mut *conn).await?;
        Self::rows_to_orders(&mut conn, rows).await
    }

    async fn payments(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        Self::payments_in(&mut conn, order_id).await
    }

    async fn payment_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_order_id = $1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn payment_by_gateway_payment_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway_payment_id = $1"
        ))
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn history(&self, order_id: OrderId) -> Result<Vec<StatusEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM order_status_history WHERE order_id = $1 ORDER BY sequence ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn commit(&self, change: OrderChange) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // Lock the order row for the rest of the transaction
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(change.order_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        let current = Self::rows_to_orders(&mut tx, rows)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::OrderNotFound(change.order_id))?;

        if current.version() != change.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                order_id: change.order_id,
                expected: change.expected_version,
                actual: current.version(),
            });
        }

        let existing = Self::payments_in(&mut tx, change.order_id).await?;
        change.validate(&current, &existing)?;

        let mut updated = current.clone();
        updated.apply(&change);

        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, shipping_address = $4, billing_address = $5,
                notes = $6, version = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(updated.id().as_uuid())
        .bind(updated.status().as_str())
        .bind(updated.payment_status().as_str())
        .bind(serde_json::to_value(updated.shipping_address())?)
        .bind(serde_json::to_value(updated.billing_address())?)
        .bind(updated.notes())
        .bind(updated.version().as_i64())
        .bind(updated.updated_at())
        .execute(&mut *tx)
        .await?;

        // Settle existing attempts before inserting new ones so the
        // one-open-payment index never sees two open rows
        let (updates, inserts): (Vec<&Payment>, Vec<&Payment>) = change
            .payments
            .iter()
            .partition(|p| existing.iter().any(|e| e.id == p.id));
        for payment in updates.into_iter().chain(inserts) {
            Self::upsert_payment(&mut tx, payment).await?;
        }

        for entry in &change.entries {
            Self::insert_entry(&mut tx, entry).await?;
        }

        tx.commit().await.inspect_err(|e| {
            warn!(order_id = %change.order_id, error = %e, "Order commit failed");
        })?;
        Ok(updated)
    }
}
