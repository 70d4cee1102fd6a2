//! Vary index: resource (origin and path) to the vary rule its last
//! response declared.

use std::collections::BTreeMap;

use edge_core::Url;
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;
use crate::key::resource_key;
use crate::policy::VaryRule;

use super::{MetadataIndex, VARY_INDEX};

/// A vary rule and when it was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryIndexEntry {
    pub rule: VaryRule,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

/// Resource to vary rule.
pub type VaryIndex = BTreeMap<String, VaryIndexEntry>;

impl MetadataIndex {
    /// Read the vary index without locking.
    pub async fn vary_index(&self) -> CacheResult<VaryIndex> {
        self.read(VARY_INDEX).await
    }

    /// Vary rule recorded for a URL.
    pub async fn lookup_vary(&self, url: &Url) -> CacheResult<Option<VaryRule>> {
        let mut index = self.vary_index().await?;
        Ok(index.remove(&resource_key(url)).map(|entry| entry.rule))
    }

    /// Record the rule for a URL, evicting the oldest entries beyond the
    /// configured maximum. Returns the number evicted.
    pub async fn record_vary(&self, url: &Url, rule: &VaryRule) -> CacheResult<usize> {
        let key = resource_key(url);
        let now = self.now_millis();
        let max_entries = self.config.max_vary_entries;

        let evicted = self
            .update(VARY_INDEX, |index: &mut VaryIndex| {
                index.insert(
                    key.clone(),
                    VaryIndexEntry {
                        rule: rule.clone(),
                        updated_at: now,
                    },
                );
                evict_oldest(index, max_entries)
            })
            .await?;

        if evicted > 0 {
            self.logger
                .info("vary index over capacity, evicted oldest entries")
                .field_u64("evicted", evicted as u64)
                .field_u64("max_entries", max_entries as u64)
                .emit();
        }

        Ok(evicted)
    }

    /// Forget the rule for a URL whose latest response declared none.
    ///
    /// Checks without locking first; returns whether an entry was removed.
    pub async fn forget_vary(&self, url: &Url) -> CacheResult<bool> {
        let key = resource_key(url);
        if !self.vary_index().await?.contains_key(&key) {
            return Ok(false);
        }

        self.update(VARY_INDEX, move |index: &mut VaryIndex| index.remove(&key).is_some())
            .await
    }

    /// Drop vary entries older than the configured maximum age. Returns the
    /// number removed.
    pub async fn cleanup_vary(&self) -> CacheResult<usize> {
        let cutoff = self
            .now_millis()
            .saturating_sub(self.config.vary_max_age().as_millis() as u64);

        let removed = self
            .update(VARY_INDEX, move |index: &mut VaryIndex| {
                let before = index.len();
                index.retain(|_, entry| entry.updated_at >= cutoff);
                before - index.len()
            })
            .await?;

        self.logger
            .info("vary index cleanup finished")
            .field_u64("removed", removed as u64)
            .emit();

        Ok(removed)
    }
}

fn evict_oldest(index: &mut VaryIndex, max_entries: usize) -> usize {
    if index.len() <= max_entries {
        return 0;
    }

    let mut by_age: Vec<(u64, String)> = index
        .iter()
        .map(|(url, entry)| (entry.updated_at, url.clone()))
        .collect();
    by_age.sort();

    let excess = index.len() - max_entries;
    for (_, url) in by_age.into_iter().take(excess) {
        index.remove(&url);
    }
    excess
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use edge_core::ManualClock;
    use edge_kv::MemoryStore;
    use edge_observability::MemoryLogger;

    use super::*;
    use crate::config::IndexConfig;

    fn index(clock: Arc<ManualClock>, config: IndexConfig) -> MetadataIndex {
        MetadataIndex::new(
            Arc::new(MemoryStore::new()),
            clock,
            Arc::new(MemoryLogger::new()),
            config,
        )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let index = index(Arc::new(ManualClock::default()), IndexConfig::default());
        let rule = VaryRule::new().header("accept-language");

        index
            .record_vary(&url("https://shop.example/p?b=2&a=1"), &rule)
            .await
            .unwrap();

        for other_query in ["https://shop.example/p?a=1&b=2", "https://shop.example/p", "https://shop.example/p?utm=mail"] {
            let found = index.lookup_vary(&url(other_query)).await.unwrap();
            assert_eq!(found.as_ref(), Some(&rule), "{}", other_query);
        }

        assert_eq!(
            index.lookup_vary(&url("https://shop.example/other")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let index = index(Arc::new(ManualClock::default()), IndexConfig::default());
        let page = url("https://shop.example/p");

        index.record_vary(&page, &VaryRule::new().header("a")).await.unwrap();
        index.record_vary(&page, &VaryRule::new().cookie("b")).await.unwrap();

        let found = index.lookup_vary(&page).await.unwrap().unwrap();
        assert_eq!(found.cookie_names, vec!["b"]);
        assert!(found.header_names.is_empty());
    }

    #[tokio::test]
    async fn test_forget_vary() {
        let index = index(Arc::new(ManualClock::default()), IndexConfig::default());
        let page = url("https://shop.example/p");

        assert!(!index.forget_vary(&page).await.unwrap());

        index.record_vary(&page, &VaryRule::new().header("a")).await.unwrap();
        assert!(index.forget_vary(&page).await.unwrap());
        assert_eq!(index.lookup_vary(&page).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_evicts_oldest() {
        let clock = Arc::new(ManualClock::default());
        let config = IndexConfig {
            max_vary_entries: 2,
            ..Default::default()
        };
        let index = index(clock.clone(), config);
        let rule = VaryRule::new().header("accept");

        for path in ["/a", "/b", "/c"] {
            let evicted = index
                .record_vary(&url(&format!("https://shop.example{}", path)), &rule)
                .await
                .unwrap();
            clock.advance(Duration::from_secs(1));
            if path == "/c" {
                assert_eq!(evicted, 1);
            }
        }

        let map = index.vary_index().await.unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("https://shop.example/a"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_entries() {
        let clock = Arc::new(ManualClock::default());
        let index = index(clock.clone(), IndexConfig::default());
        let rule = VaryRule::new().header("accept");

        index.record_vary(&url("https://shop.example/old"), &rule).await.unwrap();
        clock.advance(Duration::from_secs(86_400 + 1));
        index.record_vary(&url("https://shop.example/new"), &rule).await.unwrap();

        assert_eq!(index.cleanup_vary().await.unwrap(), 1);

        let map = index.vary_index().await.unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["https://shop.example/new"]);
    }
}
