//! In-memory element store.
//!
//! Backs the single-process runtime state and the test suite. Writes are
//! visible to any subsequent read (read-after-write within one process);
//! concurrent updates to the same key are serialized by the lock, never
//! coalesced.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Keyed, Store};
use crate::{AppError, Result};

/// `Store` implementation over a key-ordered in-memory map.
pub struct MemoryStore<T> {
    items: RwLock<BTreeMap<String, T>>,
}

impl<T> MemoryStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Keyed + Clone + Send + Sync> Store<T> for MemoryStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn create(&self, item: T) -> Result<T> {
        let mut items = self.items.write().await;
        let key = item.key().to_owned();
        if items.contains_key(&key) {
            return Err(AppError::Storage(format!("duplicate key: {key}")));
        }
        items.insert(key, item.clone());
        Ok(item)
    }

    async fn update(&self, id: &str, item: T) -> Result<T> {
        let mut items = self.items.write().await;
        if !items.contains_key(id) {
            return Err(AppError::NotFound(format!("no entity with id {id}")));
        }
        items.insert(id.to_owned(), item.clone());
        Ok(item)
    }
}
