//! In-memory store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{Store, StoreError};

/// A process-local [`Store`] backed by a hash map.
///
/// Every operation yields to the scheduler before touching the map, so
/// concurrent tasks interleave at store calls the way they would against a
/// remote store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a key is present, without yielding.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        // A panic while holding the guard cannot leave the map half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("a", Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"1")));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        store.put("a", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"2")));
    }

    #[tokio::test]
    async fn test_keys_sorted() {
        let store = MemoryStore::new();
        store.put("b", Bytes::new()).await.unwrap();
        store.put("a", Bytes::new()).await.unwrap();

        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.contains_key("a"));
        assert!(!store.is_empty());
    }
}
