//! Short-lived guest carts.
//!
//! Session carts live in a `moka` cache with a time-to-live; every write
//! re-inserts the cart and so restarts its expiry.

use std::hash::{BuildHasher, RandomState};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OwnerKey, ProductId, VariantId};
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    CartItem, Result, StoreError,
    memory::{add_to_lines, remove_from_lines, set_in_lines},
    store::CartStore,
};

/// Number of write locks shared out among session keys.
const WRITE_STRIPES: usize = 64;

/// Cart store for guest sessions backed by an expiring cache.
///
/// Only accepts [`OwnerKey::Session`] owners.
#[derive(Clone)]
pub struct SessionCartStore {
    cache: Cache<String, Vec<CartItem>>,
    // Read-modify-write cycles on one key always take the same stripe
    writes: Arc<[Mutex<()>]>,
    hasher: RandomState,
}

impl SessionCartStore {
    /// Creates a store whose carts expire `ttl` after their last write.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            writes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn write_lock(&self, key: &str) -> &Mutex<()> {
        let stripe = self.hasher.hash_one(key) as usize % self.writes.len();
        &self.writes[stripe]
    }

    fn cache_key(owner: &OwnerKey) -> Result<String> {
        if !owner.is_session() {
            return Err(StoreError::InvalidData(format!(
                "session cart store cannot hold cart of {owner}"
            )));
        }
        Ok(format!("cart:{}", owner.as_key()))
    }

    async fn load(&self, key: &str) -> Vec<CartItem> {
        self.cache.get(key).await.unwrap_or_default()
    }

    async fn save(&self, key: String, lines: Vec<CartItem>) {
        if lines.is_empty() {
            self.cache.invalidate(&key).await;
        } else {
            self.cache.insert(key, lines).await;
        }
    }

    /// Drops every cached cart.
    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CartStore for SessionCartStore {
    async fn items(&self, owner: &OwnerKey) -> Result<Vec<CartItem>> {
        let key = Self::cache_key(owner)?;
        Ok(self.load(&key).await)
    }

    async fn find(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<CartItem>> {
        let key = Self::cache_key(owner)?;
        Ok(self
            .load(&key)
            .await
            .into_iter()
            .find(|l| l.is_for(product_id, variant_id)))
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
        let key = Self::cache_key(owner)?;
        let _guard = self.write_lock(&key).lock().await;

        let mut lines = self.load(&key).await;
        let line = add_to_lines(
            &mut lines, owner, product_id, variant_id, quantity, unit_price, now,
        );
        self.save(key, lines).await;
        Ok(line)
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
        let key = Self::cache_key(owner)?;
        let _guard = self.write_lock(&key).lock().await;

        let mut lines = self.load(&key).await;
        if !set_in_lines(&mut lines, product_id, variant_id, quantity, unit_price, now) {
            return Ok(false);
        }
        self.save(key, lines).await;
        Ok(true)
    }

    async fn remove(
        &self,
        owner: &OwnerKey,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<bool> {
        let key = Self::cache_key(owner)?;
        let _guard = self.write_lock(&key).lock().await;

        let mut lines = self.load(&key).await;
        if !remove_from_lines(&mut lines, product_id, variant_id) {
            return Ok(false);
        }
        self.save(key, lines).await;
        Ok(true)
    }

    async fn clear(&self, owner: &OwnerKey) -> Result<usize> {
        let key = Self::cache_key(owner)?;
        let _guard = self.write_lock(&key).lock().await;

        let removed = self.cache.remove(&key).await.map(|l| l.len()).unwrap_or(0);
        debug!(cache_key = %key, removed, "Cleared session cart");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionCartStore {
        SessionCartStore::new(Duration::from_secs(60), 100)
    }

    #[tokio::test]
    async fn session_lines_accumulate() {
        let store = store();
        let owner = OwnerKey::session("sess-1");
        let product = ProductId::new("P-1");

        store
            .add_quantity(&owner, &product, None, 1, Money::from_minor(10), Utc::now())
            .await
            .unwrap();
        let line = store
            .add_quantity(&owner, &product, None, 2, Money::from_minor(10), Utc::now())
            .await
            .unwrap();

        assert_eq!(line.quantity, 3);
        assert_eq!(store.items(&owner).await.unwrap(), vec![line]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_to_one_session_are_not_lost() {
        let store = store();
        let owner = OwnerKey::session("sess-busy");
        let other = OwnerKey::session("sess-quiet");
        let product = ProductId::new("P-1");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let owner = owner.clone();
            let product = product.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_quantity(&owner, &product, None, 1, Money::from_minor(10), Utc::now())
                    .await
                    .unwrap();
            }));
        }
        store
            .add_quantity(&other, &product, None, 7, Money::from_minor(10), Utc::now())
            .await
            .unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        let lines = store.items(&owner).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 50);
        assert_eq!(store.items(&other).await.unwrap()[0].quantity, 7);
    }

    #[tokio::test]
    async fn user_owners_are_rejected() {
        let store = store();
        let owner = OwnerKey::user(common::UserId::new());
        assert!(matches!(
            store.items(&owner).await,
            Err(StoreError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn carts_expire_after_ttl() {
        let store = SessionCartStore::new(Duration::from_millis(50), 100);
        let owner = OwnerKey::session("sess-ttl");
        store
            .add_quantity(&owner, &ProductId::new("P-1"), None, 1, Money::from_minor(10), Utc::now())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.items(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_last_line_empties_cart() {
        let store = store();
        let owner = OwnerKey::session("sess-2");
        let product = ProductId::new("P-1");
        store
            .add_quantity(&owner, &product, None, 1, Money::from_minor(10), Utc::now())
            .await
            .unwrap();

        assert!(store.remove(&owner, &product, None).await.unwrap());
        assert!(store.items(&owner).await.unwrap().is_empty());
        assert_eq!(store.clear(&owner).await.unwrap(), 0);
    }
}
