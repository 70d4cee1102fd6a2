//! Metadata indices shared by every writer of one store.
//!
//! Each index is a single JSON record. Every mutation is a full
//! read-modify-write under an [`AdvisoryLock`], retried with jittered
//! exponential backoff.

mod lock;
mod retry;
mod tags;
mod vary;

use std::sync::Arc;
use std::time::Duration;

use edge_core::Clock;
use edge_kv::{store_key, JsonStoreExt, Store, StoreError};
use edge_observability::CacheLogger;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::IndexConfig;
use crate::error::{CacheError, CacheResult};

pub use lock::{generate_owner_token, AdvisoryLock, LockGuard, LockRecord};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use tags::TagIndex;
pub use vary::{VaryIndex, VaryIndexEntry};

/// Record name of the tag index.
pub const TAG_INDEX: &str = "tag-index";

/// Record name of the vary index.
pub const VARY_INDEX: &str = "vary-index";

/// Locked access to the tag and vary indices.
pub struct MetadataIndex {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CacheLogger>,
    config: IndexConfig,
    lock: AdvisoryLock,
    retry: RetryPolicy,
}

impl MetadataIndex {
    /// Create an index over `store`.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn CacheLogger>,
        config: IndexConfig,
    ) -> Self {
        let lock = AdvisoryLock::new(
            store.clone(),
            clock.clone(),
            config.key_prefix.clone(),
            config.lock_timeout(),
            Duration::from_millis(config.lock_settle_ms),
        );
        let retry = RetryPolicy::from_config(&config);

        Self {
            store,
            clock,
            logger,
            config,
            lock,
            retry,
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store key of an index record.
    pub fn record_key(&self, name: &str) -> String {
        store_key!(&self.config.key_prefix, name)
    }

    /// Read an index without locking.
    ///
    /// A missing record reads as empty. So does an unparseable one, which
    /// the next locked update overwrites.
    pub async fn read<T>(&self, name: &str) -> CacheResult<T>
    where
        T: DeserializeOwned + Default + Send,
    {
        let key = self.record_key(name);
        match self.store.get_json::<T>(&key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Ok(T::default()),
            Err(StoreError::Serialization(e)) => {
                self.logger
                    .warn("index record unreadable, treating as empty")
                    .field("index", name)
                    .error(&e)
                    .emit();
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `update` to an index under its lock and write the result back.
    ///
    /// Ownership is confirmed again right before the write. When the lock
    /// was taken over in between, the computed value is discarded and the
    /// cycle starts over, so `update` may run more than once. The lock is
    /// released whether or not the update succeeded.
    pub async fn update<T, R, F>(&self, name: &str, mut update: F) -> CacheResult<R>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync,
        R: Send,
        F: FnMut(&mut T) -> R + Send,
    {
        let mut attempt = 0;
        loop {
            let guard = self.acquire(name, &mut attempt).await?;

            let result: CacheResult<Option<R>> = async {
                let mut value: T = self.read(name).await?;
                let output = update(&mut value);
                if !self.lock.holds(&guard).await? {
                    return Ok(None);
                }
                self.store.put_json(&self.record_key(name), &value).await?;
                Ok(Some(output))
            }
            .await;

            self.release(guard).await;
            match result? {
                Some(output) => return Ok(output),
                None => self.lost_lock(name, &mut attempt).await?,
            }
        }
    }

    /// Delete an index under its lock, returning its last contents.
    pub async fn take<T>(&self, name: &str) -> CacheResult<T>
    where
        T: DeserializeOwned + Default + Send,
    {
        let mut attempt = 0;
        loop {
            let guard = self.acquire(name, &mut attempt).await?;

            let result: CacheResult<Option<T>> = async {
                let value: T = self.read(name).await?;
                if !self.lock.holds(&guard).await? {
                    return Ok(None);
                }
                self.store.delete(&self.record_key(name)).await?;
                Ok(Some(value))
            }
            .await;

            self.release(guard).await;
            match result? {
                Some(value) => return Ok(value),
                None => self.lost_lock(name, &mut attempt).await?,
            }
        }
    }

    async fn acquire(&self, name: &str, attempt: &mut u32) -> CacheResult<LockGuard> {
        loop {
            if let Some(guard) = self.lock.try_acquire(name).await? {
                return Ok(guard);
            }

            self.logger
                .debug("lock busy")
                .field("index", name)
                .field_u64("attempt", u64::from(*attempt + 1))
                .emit();
            self.back_off(name, attempt).await?;
        }
    }

    async fn lost_lock(&self, name: &str, attempt: &mut u32) -> CacheResult<()> {
        self.logger
            .warn("lock lost before write, retrying update")
            .field("index", name)
            .field_u64("attempt", u64::from(*attempt + 1))
            .emit();
        self.back_off(name, attempt).await
    }

    /// Sleep before the next attempt, or fail once the attempts are spent.
    async fn back_off(&self, name: &str, attempt: &mut u32) -> CacheResult<()> {
        if !self.retry.should_retry(*attempt) {
            self.logger
                .error("lock acquisition failed")
                .field("index", name)
                .field_u64("attempts", u64::from(*attempt + 1))
                .emit();
            return Err(CacheError::LockContention {
                lock: self.lock.lock_key(name),
                attempts: *attempt + 1,
            });
        }

        let delay = self.retry.backoff.jittered_delay(*attempt);
        tokio::time::sleep(delay).await;
        *attempt += 1;
        Ok(())
    }

    async fn release(&self, guard: LockGuard) {
        let name = guard.name().to_string();
        match self.lock.release(guard).await {
            Ok(true) => {}
            Ok(false) => {
                self.logger
                    .warn("lock was taken over before release")
                    .field("index", name)
                    .emit();
            }
            Err(e) => {
                self.logger
                    .warn("lock release failed")
                    .field("index", name)
                    .error(&e)
                    .emit();
            }
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use edge_core::ManualClock;
    use edge_kv::MemoryStore;
    use edge_observability::{LogLevel, MemoryLogger};

    use super::*;

    /// Store that hands the tag index lock to another writer the first time
    /// the index record is read.
    #[derive(Default)]
    struct TakeoverStore {
        inner: MemoryStore,
        taken: AtomicBool,
    }

    #[async_trait]
    impl Store for TakeoverStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
            if key == "__edge_cache__:tag-index" && !self.taken.swap(true, Ordering::SeqCst) {
                let other = LockRecord {
                    name: TAG_INDEX.to_string(),
                    acquired_at: 0,
                    owner: "other-writer".to_string(),
                };
                self.inner
                    .put("__edge_cache__:lock:tag-index", Bytes::from(serde_json::to_vec(&other)?))
                    .await?;
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
    }

    fn index(store: Arc<MemoryStore>, logger: Arc<MemoryLogger>) -> MetadataIndex {
        MetadataIndex::new(
            store,
            Arc::new(ManualClock::default()),
            logger,
            IndexConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_update_writes_record_and_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let index = index(store.clone(), Arc::new(MemoryLogger::new()));

        let len = index
            .update(TAG_INDEX, |map: &mut BTreeMap<String, u32>| {
                map.insert("a".to_string(), 1);
                map.len()
            })
            .await
            .unwrap();

        assert_eq!(len, 1);
        assert_eq!(store.keys(), vec!["__edge_cache__:tag-index"]);

        let map: BTreeMap<String, u32> = index.read(TAG_INDEX).await.unwrap();
        assert_eq!(map.get("a"), Some(&1));
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_empty_and_heals() {
        let store = Arc::new(MemoryStore::new());
        let logger = Arc::new(MemoryLogger::new());
        let index = index(store.clone(), logger.clone());

        store
            .put("__edge_cache__:tag-index", Bytes::from_static(b"{broken"))
            .await
            .unwrap();

        let map: BTreeMap<String, u32> = index.read(TAG_INDEX).await.unwrap();
        assert!(map.is_empty());
        assert_eq!(logger.at_level(LogLevel::Warn).len(), 1);

        index
            .update(TAG_INDEX, |map: &mut BTreeMap<String, u32>| {
                map.insert("b".to_string(), 2);
            })
            .await
            .unwrap();

        let map: BTreeMap<String, u32> = index.read(TAG_INDEX).await.unwrap();
        assert_eq!(map.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_contention_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let index = index(store.clone(), Arc::new(MemoryLogger::new()))
            .with_retry_policy(RetryPolicy::new(3));

        let holder = AdvisoryLock::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            "__edge_cache__",
            Duration::from_secs(10),
            Duration::ZERO,
        );
        let _guard = holder.try_acquire(TAG_INDEX).await.unwrap().unwrap();

        let result = index
            .update(TAG_INDEX, |map: &mut BTreeMap<String, u32>| map.len())
            .await;

        match result {
            Err(CacheError::LockContention { lock, attempts }) => {
                assert_eq!(lock, "__edge_cache__:lock:tag-index");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected lock contention, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lock_discards_write_and_retries() {
        let store = Arc::new(TakeoverStore::default());
        let logger = Arc::new(MemoryLogger::new());
        let index = MetadataIndex::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            logger.clone(),
            IndexConfig::default(),
        );

        let mut runs = 0;
        index
            .update(TAG_INDEX, |map: &mut BTreeMap<String, u32>| {
                runs += 1;
                map.insert("a".to_string(), runs);
            })
            .await
            .unwrap();

        assert_eq!(runs, 2);
        let map: BTreeMap<String, u32> = index.read(TAG_INDEX).await.unwrap();
        assert_eq!(map.get("a"), Some(&2));
        assert!(logger.contains("lock lost before write"));
        assert!(!store.inner.contains_key("__edge_cache__:lock:tag-index"));
    }

    #[tokio::test]
    async fn test_take_deletes_record() {
        let store = Arc::new(MemoryStore::new());
        let index = index(store.clone(), Arc::new(MemoryLogger::new()));

        index
            .update(TAG_INDEX, |map: &mut BTreeMap<String, u32>| {
                map.insert("a".to_string(), 1);
            })
            .await
            .unwrap();

        let map: BTreeMap<String, u32> = index.take(TAG_INDEX).await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(store.is_empty());
    }
}
