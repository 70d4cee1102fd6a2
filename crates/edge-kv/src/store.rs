//! The store contract and JSON record helpers.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::StoreError;

/// An asynchronous key-value store.
///
/// Keys and values are opaque. The store provides no transactions, no
/// enumeration and no expiry of its own.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Delete `key`. Returns whether a value existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// JSON serialization on top of any [`Store`].
#[async_trait]
pub trait JsonStoreExt: Store {
    /// Get and deserialize a record.
    ///
    /// A record that fails to parse is reported as
    /// [`StoreError::Serialization`] so callers can tell corruption apart
    /// from backend failures.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send;

    /// Serialize and store a record.
    async fn put_json<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync;
}

#[async_trait]
impl<S: Store + ?Sized> JsonStoreExt for S {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.put(key, bytes).await
    }
}

/// Build a namespaced store key.
///
/// # Example
///
/// ```rust,ignore
/// let key = store_key!("__edge_cache__", "lock", "tag-index");
/// // Returns "__edge_cache__:lock:tag-index"
/// ```
#[macro_export]
macro_rules! store_key {
    ($prefix:expr, $($part:expr),+) => {{
        let mut key = String::from($prefix);
        $(
            key.push(':');
            key.push_str(&$part.to_string());
        )+
        key
    }};
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::MemoryStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let store = MemoryStore::new();
        let record = Record {
            name: "tags".to_string(),
            count: 3,
        };

        store.put_json("record", &record).await.unwrap();
        let loaded: Option<Record> = store.get_json("record").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn test_json_missing_key() {
        let store = MemoryStore::new();
        let loaded: Option<Record> = store.get_json("missing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_json_corrupt_record() {
        let store = MemoryStore::new();
        store.put("record", Bytes::from_static(b"{not json")).await.unwrap();

        let result: Result<Option<Record>, _> = store.get_json("record").await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_store_key_macro() {
        let key = store_key!("prefix", "lock", 7);
        assert_eq!(key, "prefix:lock:7");
    }
}
