//! Catalog lookup port.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Money, ProductId, VariantId};

use crate::DomainError;

/// A product as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub active: bool,
    /// Whether stock is enforced for this product and its variants.
    pub track_quantity: bool,
    pub available_quantity: u32,
    pub price: Money,
}

/// A purchasable variant of a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub active: bool,
    pub available_quantity: u32,
    pub price: Money,
}

/// Live product and inventory lookup.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, DomainError>;

    async fn variant(&self, id: &VariantId) -> Result<Option<Variant>, DomainError>;
}

/// Current price and stock of one purchasable line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineQuote {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub sku: String,
    pub name: String,
    pub price: Money,
    /// `None` when stock is not tracked.
    pub available: Option<u32>,
}

impl LineQuote {
    /// Fails with `InsufficientInventory` if `requested` exceeds tracked stock.
    pub fn ensure_available(&self, requested: u32) -> Result<(), DomainError> {
        match self.available {
            Some(available) if available < requested => Err(DomainError::InsufficientInventory {
                product_id: self.product_id.clone(),
                requested,
                available,
            }),
            _ => Ok(()),
        }
    }
}

/// Looks up the live price and stock of a product or one of its variants.
///
/// Fails with `ProductUnavailable` if either is missing or inactive, or if the
/// variant belongs to another product.
pub async fn quote_line(
    catalog: &dyn Catalog,
    product_id: &ProductId,
    variant_id: Option<&VariantId>,
) -> Result<LineQuote, DomainError> {
    let product = catalog
        .product(product_id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| DomainError::ProductUnavailable(product_id.to_string()))?;

    let Some(variant_id) = variant_id else {
        return Ok(LineQuote {
            product_id: product.id,
            variant_id: None,
            sku: product.sku,
            name: product.name,
            price: product.price,
            available: product.track_quantity.then_some(product.available_quantity),
        });
    };

    let variant = catalog
        .variant(variant_id)
        .await?
        .filter(|v| v.active && &v.product_id == product_id)
        .ok_or_else(|| DomainError::ProductUnavailable(format!("{product_id}/{variant_id}")))?;

    Ok(LineQuote {
        product_id: product.id,
        variant_id: Some(variant.id),
        sku: variant.sku,
        name: format!("{} - {}", product.name, variant.name),
        price: variant.price,
        available: product.track_quantity.then_some(variant.available_quantity),
    })
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Variant>,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, product: Product) {
        self.write().products.insert(product.id.clone(), product);
    }

    pub fn upsert_variant(&self, variant: Variant) {
        self.write().variants.insert(variant.id.clone(), variant);
    }

    /// Adds an active, stock-tracked product.
    pub fn add_product(&self, id: &str, price: Money, available: u32) -> ProductId {
        let product_id = ProductId::new(id);
        self.upsert_product(Product {
            id: product_id.clone(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            active: true,
            track_quantity: true,
            available_quantity: available,
            price,
        });
        product_id
    }

    /// Changes the live price of a product.
    pub fn set_price(&self, id: &ProductId, price: Money) {
        if let Some(product) = self.write().products.get_mut(id) {
            product.price = price;
        }
    }

    /// Changes the available stock of a product.
    pub fn set_stock(&self, id: &ProductId, available: u32) {
        if let Some(product) = self.write().products.get_mut(id) {
            product.available_quantity = available;
        }
    }

    pub fn set_active(&self, id: &ProductId, active: bool) {
        if let Some(product) = self.write().products.get_mut(id) {
            product.active = active;
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, DomainError> {
        Ok(self.read().products.get(id).cloned())
    }

    async fn variant(&self, id: &VariantId) -> Result<Option<Variant>, DomainError> {
        Ok(self.read().variants.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quote_uses_product_price_and_stock() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.add_product("A", Money::from_minor(1500), 4);

        let quote = quote_line(&catalog, &id, None).await.unwrap();

        assert_eq!(quote.price, Money::from_minor(1500));
        assert_eq!(quote.available, Some(4));
        assert!(quote.ensure_available(4).is_ok());
        assert!(matches!(
            quote.ensure_available(5),
            Err(DomainError::InsufficientInventory { requested: 5, available: 4, .. })
        ));
    }

    #[tokio::test]
    async fn inactive_products_are_unavailable() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.add_product("A", Money::from_minor(1500), 4);
        catalog.set_active(&id, false);

        assert!(matches!(
            quote_line(&catalog, &id, None).await,
            Err(DomainError::ProductUnavailable(_))
        ));
        assert!(matches!(
            quote_line(&catalog, &ProductId::new("missing"), None).await,
            Err(DomainError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn variant_quote_uses_variant_price() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.add_product("A", Money::from_minor(1500), 4);
        catalog.upsert_variant(Variant {
            id: VariantId::new("A-RED"),
            product_id: id.clone(),
            sku: "SKU-A-RED".to_string(),
            name: "Red".to_string(),
            active: true,
            available_quantity: 1,
            price: Money::from_minor(1700),
        });

        let quote = quote_line(&catalog, &id, Some(&VariantId::new("A-RED")))
            .await
            .unwrap();

        assert_eq!(quote.price, Money::from_minor(1700));
        assert_eq!(quote.sku, "SKU-A-RED");
        assert_eq!(quote.available, Some(1));

        let other = catalog.add_product("B", Money::from_minor(100), 1);
        assert!(matches!(
            quote_line(&catalog, &other, Some(&VariantId::new("A-RED"))).await,
            Err(DomainError::ProductUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn untracked_stock_is_unbounded() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.add_product("A", Money::from_minor(100), 0);
        let mut product = catalog.product(&id).await.unwrap().unwrap();
        product.track_quantity = false;
        catalog.upsert_product(product);

        let quote = quote_line(&catalog, &id, None).await.unwrap();
        assert_eq!(quote.available, None);
        assert!(quote.ensure_available(10_000).is_ok());
    }
}
