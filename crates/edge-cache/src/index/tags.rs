//! Tag index: tag to the set of entry keys carrying it.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CacheResult;
use crate::key::CacheKey;

use super::{MetadataIndex, TAG_INDEX};

/// Tag to keys. Tags with no keys are never kept.
pub type TagIndex = BTreeMap<String, BTreeSet<String>>;

impl MetadataIndex {
    /// Read the tag index without locking.
    pub async fn tag_index(&self) -> CacheResult<TagIndex> {
        self.read(TAG_INDEX).await
    }

    /// Add `key` to the set of every tag in `tags`.
    pub async fn add_key_to_tags(&self, key: &CacheKey, tags: &[String]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }

        self.update(TAG_INDEX, |index: &mut TagIndex| {
            for tag in tags {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.as_str().to_string());
            }
        })
        .await
    }

    /// Remove a tag and return its keys, dropping those keys from every
    /// other tag as well.
    pub async fn remove_tag(&self, tag: &str) -> CacheResult<BTreeSet<String>> {
        self.update(TAG_INDEX, |index: &mut TagIndex| {
            let keys = index.remove(tag).unwrap_or_default();
            prune(index, |key| keys.contains(key));
            keys
        })
        .await
    }

    /// Remove every key for which `matches` holds and return them.
    pub async fn remove_keys_where<F>(&self, matches: F) -> CacheResult<BTreeSet<String>>
    where
        F: Fn(&str) -> bool + Send,
    {
        self.update(TAG_INDEX, move |index: &mut TagIndex| {
            let removed: BTreeSet<String> = index
                .values()
                .flatten()
                .filter(|key| matches(key.as_str()))
                .cloned()
                .collect();
            prune(index, |key| removed.contains(key));
            removed
        })
        .await
    }

    /// Delete the tag index and return every key it referenced.
    pub async fn clear_tags(&self) -> CacheResult<BTreeSet<String>> {
        let index: TagIndex = self.take(TAG_INDEX).await?;
        Ok(index.into_values().flatten().collect())
    }
}

fn prune(index: &mut TagIndex, remove: impl Fn(&str) -> bool) {
    for keys in index.values_mut() {
        keys.retain(|key| !remove(key.as_str()));
    }
    index.retain(|_, keys| !keys.is_empty());
}
