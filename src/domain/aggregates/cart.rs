//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::Money;
use crate::ErrorKind;

/// Size/color selection of a line. Empty strings are treated as "no selection".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Variant {
    pub fn new(size: Option<String>, color: Option<String>) -> Option<Self> {
        let size = size.filter(|s| !s.trim().is_empty());
        let color = color.filter(|c| !c.trim().is_empty());
        if size.is_none() && color.is_none() { None } else { Some(Self { size, color }) }
    }
}

/// Identity of a cart line: the product plus its variant selection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub product_id: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl LineKey {
    pub fn new(product_id: impl Into<String>, size: Option<String>, color: Option<String>) -> Self {
        let variant = Variant::new(size, color).unwrap_or_default();
        Self { product_id: product_id.into(), size: variant.size, color: variant.color }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub sale_price: Option<Money>,
    pub quantity: u32,
    #[serde(default)]
    pub variant: Option<Variant>,
    /// Last known stock. Informational; the Order service has the final say.
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl CartItem {
    /// Price actually charged per unit: the sale price when one is set.
    pub fn effective_price(&self) -> Money { self.sale_price.unwrap_or(self.unit_price) }
    pub fn line_total(&self) -> Money { self.effective_price().multiply(self.quantity) }

    /// Both the list price and any sale price must be positive.
    pub fn has_valid_price(&self) -> bool {
        self.unit_price.is_positive() && self.sale_price.map_or(true, |p| p.is_positive())
    }

    pub fn key(&self) -> LineKey {
        let variant = self.variant.clone().unwrap_or_default();
        LineKey::new(self.product_id.clone(), variant.size, variant.color)
    }

    fn normalized(mut self) -> Self {
        self.variant = self.variant.and_then(|v| Variant::new(v.size, v.color));
        self
    }
}

/// Cart line items and the figures derived from them.
#[derive(Clone, Debug)]
pub struct CartLedger {
    items: Vec<CartItem>,
    subtotal: Money,
    updated_at: DateTime<Utc>,
}

impl Default for CartLedger {
    fn default() -> Self { Self::new() }
}

impl CartLedger {
    pub fn new() -> Self {
        Self { items: vec![], subtotal: Money::ZERO, updated_at: Utc::now() }
    }

    /// Rebuilds a ledger from persisted lines, merging duplicates and dropping
    /// lines that could never have been added.
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items {
            if item.quantity == 0 || !item.has_valid_price() {
                tracing::warn!(product_id = %item.product_id, "dropping invalid persisted cart line");
                continue;
            }
            cart.merge(item.normalized());
        }
        cart.recalculate();
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn line_count(&self) -> usize { self.items.len() }
    pub fn item_count(&self) -> u32 { self.items.iter().fold(0, |n, i| n.saturating_add(i.quantity)) }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn get(&self, key: &LineKey) -> Option<&CartItem> { self.items.iter().find(|i| &i.key() == key) }

    /// Adds a line, merging into an existing line with the same product and variant.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if !item.has_valid_price() { return Err(CartError::InvalidPrice); }
        let item = item.normalized();
        let key = item.key();
        let requested = self
            .get(&key)
            .map_or(0, |existing| existing.quantity)
            .checked_add(item.quantity)
            .ok_or(CartError::InvalidQuantity)?;
        let stock = item.stock.or_else(|| self.get(&key).and_then(|e| e.stock));
        check_stock(&key, requested, stock)?;
        self.merge(item);
        self.recalculate();
        Ok(())
    }

    /// Sets the quantity of a line. Zero removes it.
    pub fn update_quantity(&mut self, key: &LineKey, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 { return self.remove_item(key); }
        let item = self.items.iter_mut().find(|i| &i.key() == key).ok_or(CartError::ItemNotFound)?;
        check_stock(key, quantity, item.stock)?;
        item.quantity = quantity;
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, key: &LineKey) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| &i.key() != key);
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.recalculate();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.recalculate(); }

    fn merge(&mut self, item: CartItem) {
        let key = item.key();
        if let Some(existing) = self.items.iter_mut().find(|i| i.key() == key) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            if item.stock.is_some() { existing.stock = item.stock; }
        } else {
            self.items.push(item);
        }
    }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().map(CartItem::line_total).sum();
        self.updated_at = Utc::now();
    }
}

fn check_stock(key: &LineKey, requested: u32, stock: Option<u32>) -> Result<(), CartError> {
    match stock {
        Some(available) if requested > available => Err(CartError::InsufficientStock {
            product_id: key.product_id.clone(),
            requested,
            available,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Item not found in cart")]
    ItemNotFound,
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Unit and sale prices must be positive")]
    InvalidPrice,
    #[error("Only {available} of product {product_id} in stock, {requested} requested")]
    InsufficientStock { product_id: String, requested: u32, available: u32 },
}

impl CartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ItemNotFound => ErrorKind::NotFound,
            Self::InvalidQuantity | Self::InvalidPrice => ErrorKind::Validation,
            Self::InsufficientStock { .. } => ErrorKind::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(quantity: u32) -> CartItem {
        CartItem {
            product_id: "P1".into(), name: "Widget".into(), unit_price: Money::vnd(100_000), sale_price: None,
            quantity, variant: None, stock: Some(10), category_id: Some("electronics".into()), image: None,
        }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = CartLedger::new();
        cart.add_item(widget(2)).unwrap();
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.subtotal(), Money::vnd(200_000));
        cart.add_item(widget(1)).unwrap();
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        assert_eq!(cart.item_count(), 3);
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let mut cart = CartLedger::new();
        let mut red = widget(1);
        red.variant = Some(Variant { size: Some("M".into()), color: Some("red".into()) });
        let mut blank = widget(1);
        blank.variant = Some(Variant { size: Some(String::new()), color: None });
        cart.add_item(red).unwrap();
        cart.add_item(blank).unwrap();
        cart.add_item(widget(1)).unwrap();
        assert_eq!(cart.line_count(), 2);
        assert_eq!(cart.get(&LineKey::new("P1", None, None)).map(|i| i.quantity), Some(2));
    }

    #[test]
    fn test_sale_price_drives_subtotal() {
        let mut cart = CartLedger::new();
        let mut item = widget(2);
        item.sale_price = Some(Money::vnd(80_000));
        cart.add_item(item).unwrap();
        assert_eq!(cart.subtotal(), Money::vnd(160_000));
    }

    #[test]
    fn test_quantity_updates() {
        let mut cart = CartLedger::new();
        cart.add_item(widget(2)).unwrap();
        let key = LineKey::new("P1", None, None);
        cart.update_quantity(&key, 5).unwrap();
        assert_eq!(cart.subtotal(), Money::vnd(500_000));
        cart.update_quantity(&key, 0).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal(), Money::ZERO);
        assert_eq!(cart.update_quantity(&key, 1), Err(CartError::ItemNotFound));
    }

    #[test]
    fn test_stock_cap_rejects_without_mutating() {
        let mut cart = CartLedger::new();
        cart.add_item(widget(8)).unwrap();
        let err = cart.add_item(widget(3)).unwrap_err();
        assert_eq!(err, CartError::InsufficientStock { product_id: "P1".into(), requested: 11, available: 10 });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(cart.item_count(), 8);
        assert!(cart.update_quantity(&LineKey::new("P1", None, None), 11).is_err());
        assert_eq!(cart.item_count(), 8);
    }

    #[test]
    fn test_rejects_invalid_lines() {
        let mut cart = CartLedger::new();
        assert_eq!(cart.add_item(widget(0)), Err(CartError::InvalidQuantity));
        let mut free = widget(1);
        free.unit_price = Money::ZERO;
        assert_eq!(cart.add_item(free), Err(CartError::InvalidPrice));
    }

    #[test]
    fn test_from_items_merges_and_drops_invalid() {
        let cart = CartLedger::from_items(vec![widget(1), widget(2), widget(0)]);
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.item_count(), 3);
    }

    #[test]
    fn test_quantity_overflow_is_rejected() {
        let mut cart = CartLedger::new();
        let mut unlimited = widget(1);
        unlimited.stock = None;
        cart.add_item(unlimited.clone()).unwrap();
        unlimited.quantity = u32::MAX;
        assert_eq!(cart.add_item(unlimited), Err(CartError::InvalidQuantity));
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal(), Money::vnd(100_000));
    }

    #[test]
    fn test_non_positive_sale_price_is_rejected() {
        let mut cart = CartLedger::new();
        let mut negative = widget(1);
        negative.sale_price = Some(Money::vnd(-500_000));
        assert_eq!(cart.add_item(negative.clone()), Err(CartError::InvalidPrice));
        let mut zero = widget(1);
        zero.sale_price = Some(Money::ZERO);
        assert_eq!(cart.add_item(zero.clone()), Err(CartError::InvalidPrice));
        assert!(cart.is_empty());

        let restored = CartLedger::from_items(vec![negative, zero, widget(2)]);
        assert_eq!(restored.item_count(), 2);
        assert_eq!(restored.subtotal(), Money::vnd(200_000));
    }
}
