//! Durable cart storage, one record per session.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use sqlx::PgPool;

#[cfg(test)]
use mockall::automock;

use crate::domain::aggregates::CartItem;
use crate::Result;

pub fn cart_storage_key(session_id: &str) -> String {
    format!("cart_items:{session_id}")
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Persisted lines for the session, or `None` when nothing usable is stored.
    async fn load(&self, session_id: &str) -> Result<Option<Vec<CartItem>>>;
    async fn save(&self, session_id: &str, items: &[CartItem]) -> Result<()>;
    async fn remove(&self, session_id: &str) -> Result<()>;
}

/// In-process store holding serialized snapshots.
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCartStore {
    pub fn new() -> Self { Self::default() }

    /// Stores a raw value under the session key, bypassing serialization.
    pub fn put_raw(&self, session_id: &str, raw: impl Into<String>) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(cart_storage_key(session_id), raw.into());
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(&cart_storage_key(session_id))
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn load(&self, session_id: &str) -> Result<Option<Vec<CartItem>>> {
        let key = cart_storage_key(session_id);
        let raw = self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&key).cloned();
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_str(&raw) {
            Ok(items) => Ok(Some(items)),
            Err(e) => {
                tracing::warn!(%key, error = %e, "discarding unreadable cart snapshot");
                self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(&key);
                Ok(None)
            }
        }
    }

    async fn save(&self, session_id: &str, items: &[CartItem]) -> Result<()> {
        let raw = serde_json::to_string(items)?;
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(cart_storage_key(session_id), raw);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(&cart_storage_key(session_id));
        Ok(())
    }
}

/// PostgreSQL-backed store over the `cart_snapshots` table.
#[derive(Clone, Debug)]
pub struct PgCartStore {
    db: PgPool,
}

impl PgCartStore {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn load(&self, session_id: &str) -> Result<Option<Vec<CartItem>>> {
        let key = cart_storage_key(session_id);
        let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT items FROM cart_snapshots WHERE storage_key = $1")
            .bind(&key)
            .fetch_optional(&self.db)
            .await?;
        let Some((items,)) = row else { return Ok(None) };
        match serde_json::from_value(items) {
            Ok(items) => Ok(Some(items)),
            Err(e) => {
                tracing::warn!(%key, error = %e, "discarding unreadable cart snapshot");
                self.remove(session_id).await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, session_id: &str, items: &[CartItem]) -> Result<()> {
        sqlx::query("INSERT INTO cart_snapshots (storage_key, items, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (storage_key) DO UPDATE SET items = EXCLUDED.items, updated_at = NOW()")
            .bind(cart_storage_key(session_id))
            .bind(serde_json::to_value(items)?)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cart_snapshots WHERE storage_key = $1")
            .bind(cart_storage_key(session_id))
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;

    fn item() -> CartItem {
        CartItem {
            product_id: "P1".into(), name: "Giày".into(), unit_price: Money::vnd(350_000), sale_price: None,
            quantity: 2, variant: None, stock: Some(5), category_id: None, image: None,
        }
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(cart_storage_key("abc"), "cart_items:abc");
    }

    #[tokio::test]
    async fn test_memory_round_trip_and_remove() {
        let store = MemoryCartStore::new();
        assert!(store.load("s1").await.unwrap().is_none());
        store.save("s1", &[item()]).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(vec![item()]));
        store.remove("s1").await.unwrap();
        assert!(!store.contains("s1"));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_discarded() {
        let store = MemoryCartStore::new();
        store.put_raw("s1", "{not json");
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(!store.contains("s1"));
    }
}
