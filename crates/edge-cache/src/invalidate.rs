//! Bulk invalidation driven by the tag index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use edge_kv::Store;
use edge_observability::{CacheCounter, CacheLogger, CacheMetrics};
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;
use crate::index::MetadataIndex;
use crate::key::path_of_key;

/// Summary of the tag index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Distinct keys referenced by any tag.
    pub total_keys: usize,
    /// Keys per tag.
    pub tags: BTreeMap<String, usize>,
}

/// Deletes entries by tag, by path, or all at once.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn Store>,
    logger: Arc<dyn CacheLogger>,
    metrics: Arc<CacheMetrics>,
    index: Arc<MetadataIndex>,
}

impl Invalidator {
    /// Create an invalidator.
    pub fn new(
        store: Arc<dyn Store>,
        logger: Arc<dyn CacheLogger>,
        metrics: Arc<CacheMetrics>,
        index: Arc<MetadataIndex>,
    ) -> Self {
        Self {
            store,
            logger,
            metrics,
            index,
        }
    }

    /// Delete every entry carrying `tag`. Returns how many entries existed.
    pub async fn invalidate_tag(&self, tag: &str) -> CacheResult<usize> {
        let keys = self.index.remove_tag(tag).await?;
        let deleted = self.delete_all(&keys).await?;

        self.logger
            .info("invalidated tag")
            .field("tag", tag)
            .field_u64("deleted", deleted as u64)
            .emit();
        Ok(deleted)
    }

    /// Invalidate several tags, summing the deletions.
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> CacheResult<usize> {
        let mut deleted = 0;
        for tag in tags {
            deleted += self.invalidate_tag(tag.as_ref()).await?;
        }
        Ok(deleted)
    }

    /// Delete every indexed entry whose URL path is `path` or lies below it.
    ///
    /// Only entries that carry at least one tag are known to the index.
    pub async fn invalidate_path(&self, path: &str) -> CacheResult<usize> {
        let target = path.to_string();
        let keys = self
            .index
            .remove_keys_where(move |key| {
                path_of_key(key).is_some_and(|key_path| path_matches(&key_path, &target))
            })
            .await?;
        let deleted = self.delete_all(&keys).await?;

        self.logger
            .info("invalidated path")
            .field("path", path)
            .field_u64("deleted", deleted as u64)
            .emit();
        Ok(deleted)
    }

    /// Delete every indexed entry and the tag index itself.
    pub async fn invalidate_all(&self) -> CacheResult<usize> {
        let keys = self.index.clear_tags().await?;
        let deleted = self.delete_all(&keys).await?;

        self.logger
            .info("invalidated all entries")
            .field_u64("deleted", deleted as u64)
            .emit();
        Ok(deleted)
    }

    /// Count indexed keys overall and per tag.
    pub async fn stats(&self) -> CacheResult<IndexStats> {
        let index = self.index.tag_index().await?;
        let total_keys = index.values().flatten().collect::<BTreeSet<_>>().len();
        let tags = index
            .iter()
            .map(|(tag, keys)| (tag.clone(), keys.len()))
            .collect();

        Ok(IndexStats { total_keys, tags })
    }

    async fn delete_all(&self, keys: &BTreeSet<String>) -> CacheResult<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.store.delete(key).await? {
                deleted += 1;
            }
        }
        self.metrics.add(CacheCounter::InvalidatedKeys, deleted as u64);
        Ok(deleted)
    }
}

/// Whether `key_path` equals `path` or is a descendant of it.
pub fn path_matches(key_path: &str, path: &str) -> bool {
    if key_path == path {
        return true;
    }

    let base = path.trim_end_matches('/');
    key_path == base
        || key_path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matches() {
        assert!(path_matches("/products", "/products"));
        assert!(path_matches("/products/shoes", "/products"));
        assert!(path_matches("/products/shoes", "/products/"));
        assert!(path_matches("/products", "/products/"));
        assert!(!path_matches("/products-old", "/products"));
        assert!(!path_matches("/prod", "/products"));
        assert!(path_matches("/anything", "/"));
    }
}
