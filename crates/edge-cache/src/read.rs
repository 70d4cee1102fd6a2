//! Read path: key resolution, freshness classification and conditional
//! validation.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use edge_core::{CacheRequest, CacheResponse, Clock};
use edge_kv::Store;
use edge_observability::{CacheCounter, CacheLogger, CacheMetrics};

use crate::config::{CacheConfig, SwrMode};
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::headers::{set_age, CacheStatus};
use crate::index::MetadataIndex;
use crate::key::{derive_key, CacheKey};
use crate::policy::VaryRule;
use crate::validator::{create_304, validate};

/// Freshness of a looked-up entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No entry.
    Miss,
    /// Inside its lifetime, or without expiry.
    Fresh,
    /// Expired, but inside the stale-while-revalidate window.
    StaleInWindow,
    /// Past expiry and any stale window.
    Expired,
}

/// Classify an entry at `now`.
pub fn classify(entry: Option<&CacheEntry>, now: SystemTime) -> Freshness {
    let Some(entry) = entry else {
        return Freshness::Miss;
    };
    let Some(expires_at) = entry.expires_at_time() else {
        return Freshness::Fresh;
    };

    if now < expires_at {
        return Freshness::Fresh;
    }

    match entry.stale_until() {
        Some(stale_until) if now < stale_until => Freshness::StaleInWindow,
        _ => Freshness::Expired,
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Key the request resolved to.
    pub key: CacheKey,
    /// Freshness of the stored entry. `Expired` entries have been deleted.
    pub freshness: Freshness,
    /// Response to serve, if the cache can answer.
    pub response: Option<CacheResponse>,
    /// Whether `response` is a 304 built from the entry.
    pub not_modified: bool,
    /// Whether the entry should be refreshed from the origin.
    pub needs_revalidation: bool,
    /// Time left before the served entry expires.
    pub ttl_remaining: Option<Duration>,
}

impl Lookup {
    fn empty(key: CacheKey, freshness: Freshness) -> Self {
        Self {
            key,
            freshness,
            response: None,
            not_modified: false,
            needs_revalidation: false,
            ttl_remaining: None,
        }
    }

    /// Whether the response can be served without calling the origin.
    pub fn is_hit(&self) -> bool {
        self.response.is_some()
    }

    /// Status to report for this lookup.
    pub fn status(&self) -> CacheStatus {
        if !self.key.is_storable() {
            return CacheStatus::Bypass;
        }
        match (self.freshness, self.response.is_some()) {
            (Freshness::Fresh, true) => CacheStatus::Hit,
            (Freshness::StaleInWindow, true) => CacheStatus::Stale,
            _ => CacheStatus::Miss,
        }
    }
}

/// Looks up entries and decides how they may be served.
#[derive(Clone)]
pub struct ReadEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CacheLogger>,
    metrics: Arc<CacheMetrics>,
    index: Arc<MetadataIndex>,
    config: Arc<CacheConfig>,
}

impl ReadEngine {
    /// Create a read engine.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn CacheLogger>,
        metrics: Arc<CacheMetrics>,
        index: Arc<MetadataIndex>,
        config: Arc<CacheConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            logger,
            metrics,
            index,
            config,
        }
    }

    /// Resolve the vary rule recorded for the request URL.
    ///
    /// An unreadable vary index degrades to no rule.
    pub async fn resolve_vary(&self, request: &CacheRequest) -> Option<VaryRule> {
        match self.index.lookup_vary(&request.url).await {
            Ok(rule) => rule,
            Err(e) => {
                self.logger
                    .warn("vary index lookup failed, deriving key without vary rule")
                    .field("url", request.url.as_str())
                    .error(&e)
                    .emit();
                None
            }
        }
    }

    /// Look up the entry for a request.
    ///
    /// Store read failures propagate. Expired entries are deleted on the
    /// way out.
    pub async fn lookup(&self, request: &CacheRequest) -> CacheResult<Lookup> {
        if !request.is_cacheable_method() {
            self.metrics.incr(CacheCounter::Bypass);
            return Ok(Lookup::empty(derive_key(request, None), Freshness::Miss));
        }

        let rule = self.resolve_vary(request).await;
        let key = derive_key(request, rule.as_ref());

        let entry = self.load(&key).await?;
        let now = self.clock.now();

        let mut freshness = classify(entry.as_ref(), now);
        if freshness == Freshness::StaleInWindow && self.config.swr == SwrMode::Off {
            freshness = Freshness::Expired;
        }

        let entry = match (freshness, entry) {
            (Freshness::Fresh | Freshness::StaleInWindow, Some(entry)) => entry,
            (Freshness::Expired, _) => {
                self.delete_expired(&key).await;
                self.metrics.incr(CacheCounter::Miss);
                return Ok(Lookup::empty(key, Freshness::Expired));
            }
            _ => {
                self.metrics.incr(CacheCounter::Miss);
                return Ok(Lookup::empty(key, Freshness::Miss));
            }
        };

        let stored = entry.to_response();
        let validation = self
            .config
            .conditional_requests
            .options()
            .map(|options| validate(request, &entry, &options))
            .unwrap_or_default();

        let (mut response, not_modified) = if validation.should_return_304 {
            self.metrics.incr(CacheCounter::NotModified);
            (create_304(&stored, now), true)
        } else {
            let counter = if freshness == Freshness::Fresh {
                CacheCounter::Hit
            } else {
                CacheCounter::Stale
            };
            self.metrics.incr(counter);
            (stored, false)
        };
        set_age(&mut response, entry.age(now));

        Ok(Lookup {
            key,
            freshness,
            response: Some(response),
            not_modified,
            needs_revalidation: freshness == Freshness::StaleInWindow && !not_modified,
            ttl_remaining: entry.ttl_remaining(now),
        })
    }

    /// Fetch and decode an entry. Corrupt entries read as absent.
    async fn load(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let Some(bytes) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };

        match CacheEntry::decode(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                self.logger
                    .warn("cache entry unreadable, treating as miss")
                    .field("key", key.display_form())
                    .error(&e)
                    .emit();
                self.delete_expired(key).await;
                Ok(None)
            }
        }
    }

    async fn delete_expired(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key.as_str()).await {
            self.logger
                .warn("failed to delete expired entry")
                .field("key", key.display_form())
                .error(&e)
                .emit();
        }
    }
}
