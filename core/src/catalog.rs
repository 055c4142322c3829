//! Read-only inventory catalog used to enrich allocation reads.
//!
//! The catalog is an external collaborator; this crate only needs
//! name/category lookups for display. Unknown items never fail a read, they
//! render with a placeholder instead.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::types::ItemId;

/// Catalog data for one inventory item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogItem {
    /// Item identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Category label (e.g. "beverage", "merchandise")
    pub category: String,
    /// Stock known to the catalog, if it tracks one
    pub available_quantity: Option<i64>,
}

/// Lookup seam for the inventory catalog.
///
/// A `None` result covers both "unknown item" and "catalog unavailable";
/// readers degrade to a placeholder name either way.
pub trait InventoryCatalog: Send + Sync {
    /// Look up one item by id.
    fn item(&self, id: ItemId) -> Pin<Box<dyn Future<Output = Option<CatalogItem>> + Send + '_>>;
}

/// In-memory catalog for tests and single-tenant deployments.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    items: HashMap<ItemId, CatalogItem>,
}

impl StaticCatalog {
    /// Creates an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Add an item, replacing any previous entry with the same id
    #[must_use]
    pub fn with_item(mut self, item: CatalogItem) -> Self {
        self.items.insert(item.id, item);
        self
    }
}

impl InventoryCatalog for StaticCatalog {
    fn item(&self, id: ItemId) -> Pin<Box<dyn Future<Output = Option<CatalogItem>> + Send + '_>> {
        let found = self.items.get(&id).cloned();
        Box::pin(async move { found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn lookup_hits_and_misses() {
        let id = ItemId::new();
        let catalog = StaticCatalog::new().with_item(CatalogItem {
            id,
            name: "Festival T-Shirt".to_string(),
            category: "merchandise".to_string(),
            available_quantity: Some(500),
        });

        let found = catalog.item(id).await.expect("item should exist");
        assert_eq!(found.name, "Festival T-Shirt");
        assert!(catalog.item(ItemId::new()).await.is_none());
    }
}
