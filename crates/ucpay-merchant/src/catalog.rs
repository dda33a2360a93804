//! Product catalog.
//!
//! Persistence and admin CRUD are an external collaborator; this is the
//! read-mostly in-memory view the UCP surface needs, seeded with the demo
//! products.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use ucpay_core::amount::to_minor_units;

/// A catalog product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Stable product id, `PROD-` prefixed.
    pub id: String,
    /// Stock-keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Unit price in major units.
    pub price: f64,
    /// Currency code.
    pub currency: String,
    /// Category path, e.g. `Bakery/Cookies`.
    pub category: String,
    /// Brand name.
    pub brand: String,
    /// Image URL.
    pub image_url: String,
}

/// One item in a UCP product-search response. Price is in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UcpProductItem {
    /// Product id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Price in minor currency units (cents).
    pub price: i64,
    /// Image URL.
    pub image_url: String,
    /// Description.
    pub description: String,
}

/// UCP product-search response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UcpSearchResponse {
    /// Matching items, capped at the requested limit.
    pub items: Vec<UcpProductItem>,
    /// Number of items returned.
    pub total: usize,
}

/// In-memory product catalog.
pub struct Catalog {
    products: RwLock<Vec<Product>>,
}

impl Catalog {
    /// Creates a catalog with the given products.
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(products),
        }
    }

    /// Creates a catalog seeded with the demo products.
    #[must_use]
    pub fn seeded() -> Self {
        Self::new(seed_products())
    }

    /// Whether a product with the given sku or id exists.
    #[must_use]
    pub fn contains(&self, sku_or_id: &str) -> bool {
        let products = self.products.read().unwrap();
        products
            .iter()
            .any(|p| p.sku == sku_or_id || p.id == sku_or_id)
    }

    /// Case-insensitive substring search over name, description, and
    /// category. An empty query matches everything.
    #[must_use]
    pub fn search(&self, query: Option<&str>, limit: usize) -> UcpSearchResponse {
        let needle = query.unwrap_or_default().to_lowercase();
        let products = self.products.read().unwrap();

        let items: Vec<UcpProductItem> = products
            .iter()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
                    || p.category.to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|p| UcpProductItem {
                id: p.id.clone(),
                title: p.name.clone(),
                price: to_minor_units(p.price),
                image_url: p.image_url.clone(),
                description: p.description.clone(),
            })
            .collect();

        UcpSearchResponse {
            total: items.len(),
            items,
        }
    }
}

fn seed_products() -> Vec<Product> {
    let entries = [
        (
            "PROD-001",
            "BISC-001",
            "Chocochip Cookies",
            "Delicious chocolate chip cookies, freshly baked",
            4.99,
            "Bakery/Cookies",
            "HomeBaked",
        ),
        (
            "PROD-002",
            "STRAW-001",
            "Fresh Strawberries",
            "Sweet and juicy fresh strawberries",
            4.49,
            "Produce/Fruits",
            "FarmFresh",
        ),
        (
            "PROD-003",
            "CHIPS-001",
            "Classic Potato Chips",
            "Crispy salted potato chips",
            3.79,
            "Snacks/Chips",
            "CrunchTime",
        ),
        (
            "PROD-004",
            "SW-CHIPS-001",
            "Baked Sweet Potato Chips",
            "Healthy baked sweet potato chips",
            4.79,
            "Snacks/Chips",
            "HealthyChoice",
        ),
        (
            "PROD-005",
            "O-COOKIES-001",
            "Classic Oat Cookies",
            "Wholesome oatmeal cookies with raisins",
            5.99,
            "Bakery/Cookies",
            "HomeBaked",
        ),
        (
            "PROD-006",
            "NUTRIBAR-001",
            "Nutri-Bar",
            "Nutritious energy bar with nuts and fruits",
            2.99,
            "Snacks/Bars",
            "EnergyPlus",
        ),
    ];

    entries
        .into_iter()
        .map(
            |(id, sku, name, description, price, category, brand)| Product {
                id: id.to_string(),
                sku: sku.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                price,
                currency: "SGD".to_string(),
                category: category.to_string(),
                brand: brand.to_string(),
                image_url: format!("https://images.example.com/{}.jpg", id.to_lowercase()),
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_catalog() {
        let catalog = Catalog::seeded();
        assert!(catalog.contains("PROD-001"));
        assert!(catalog.contains("BISC-001"));
        assert!(!catalog.contains("PROD-999"));
    }

    #[test]
    fn test_search_by_name() {
        let catalog = Catalog::seeded();
        let result = catalog.search(Some("cookies"), 10);
        assert_eq!(result.total, 2);
        assert!(result.items.iter().all(|i| i
            .title
            .to_lowercase()
            .contains("cookies")));
    }

    #[test]
    fn test_search_by_category() {
        let catalog = Catalog::seeded();
        let result = catalog.search(Some("snacks"), 10);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_search_prices_in_cents() {
        let catalog = Catalog::seeded();
        let result = catalog.search(Some("chocochip"), 10);
        assert_eq!(result.items[0].price, 499);
    }

    #[test]
    fn test_search_limit() {
        let catalog = Catalog::seeded();
        let result = catalog.search(None, 2);
        assert_eq!(result.total, 2);
        assert_eq!(result.items.len(), 2);
    }

    #[test]
    fn test_search_no_match() {
        let catalog = Catalog::seeded();
        let result = catalog.search(Some("durian"), 10);
        assert_eq!(result.total, 0);
    }
}
