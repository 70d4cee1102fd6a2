//! Advisory locks stored as ordinary records.
//!
//! The store offers no compare-and-swap, so a writer claims a lock by
//! writing its random owner token, waiting for a settle step, and reading
//! the record back. Only a writer that still finds its own token holds the
//! lock. A record older than the staleness timeout is treated as abandoned.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use edge_core::Clock;
use edge_kv::{store_key, Store};
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// Lock record as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Name of the guarded record.
    pub name: String,
    /// Acquisition time in milliseconds since the Unix epoch.
    pub acquired_at: u64,
    /// Random token identifying the holder.
    pub owner: String,
}

/// Proof of lock ownership, handed back to [`AdvisoryLock::release`].
#[derive(Debug)]
#[must_use = "a held lock blocks other writers until released"]
pub struct LockGuard {
    name: String,
    key: String,
    owner: String,
}

impl LockGuard {
    /// Name of the guarded record.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner token written to the lock record.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Lock manager for records sharing one store.
pub struct AdvisoryLock {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    prefix: String,
    timeout: Duration,
    settle: Duration,
}

impl AdvisoryLock {
    /// Create a lock manager.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
        timeout: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            timeout,
            settle,
        }
    }

    /// Store key of the lock guarding `name`.
    pub fn lock_key(&self, name: &str) -> String {
        store_key!(&self.prefix, "lock", name)
    }

    /// Make one attempt to take the lock.
    ///
    /// Returns `None` when another writer holds it.
    pub async fn try_acquire(&self, name: &str) -> CacheResult<Option<LockGuard>> {
        let key = self.lock_key(name);

        if let Some(current) = self.read(&key).await? {
            if !self.is_abandoned(&current) {
                return Ok(None);
            }
        }

        let record = LockRecord {
            name: name.to_string(),
            acquired_at: self.clock.now_millis(),
            owner: generate_owner_token(),
        };
        self.store
            .put(&key, Bytes::from(serde_json::to_vec(&record)?))
            .await?;

        if self.settle.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.settle).await;
        }

        match self.read(&key).await? {
            Some(current) if current.owner == record.owner => Ok(Some(LockGuard {
                name: record.name,
                key,
                owner: record.owner,
            })),
            _ => Ok(None),
        }
    }

    /// Whether the lock record still carries the guard's owner token.
    ///
    /// Checked right before a guarded write: a writer that lost the lock
    /// must not write.
    pub async fn holds(&self, guard: &LockGuard) -> CacheResult<bool> {
        Ok(self
            .read(&guard.key)
            .await?
            .is_some_and(|current| current.owner == guard.owner))
    }

    /// Release a lock. Returns `false` when the lock was taken over in the
    /// meantime and nothing was deleted.
    pub async fn release(&self, guard: LockGuard) -> CacheResult<bool> {
        if !self.holds(&guard).await? {
            return Ok(false);
        }
        self.store.delete(&guard.key).await?;
        Ok(true)
    }

    fn is_abandoned(&self, record: &LockRecord) -> bool {
        let age = self.clock.now_millis().saturating_sub(record.acquired_at);
        age >= self.timeout.as_millis() as u64
    }

    /// An unreadable lock record counts as absent.
    async fn read(&self, key: &str) -> CacheResult<Option<LockRecord>> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }
}

/// Random URL-safe owner token.
pub fn generate_owner_token() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;

    let bytes: [u8; 18] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
