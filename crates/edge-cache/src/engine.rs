//! The cache facade.

use std::sync::Arc;

use edge_core::{CacheRequest, CacheResponse, Clock, SystemClock};
use edge_kv::Store;
use edge_observability::{CacheLogger, CacheMetrics, MetricsSnapshot, TracingLogger};

use crate::config::{CacheConfig, SwrMode};
use crate::error::{CacheError, CacheResult};
use crate::headers::{strip_internal_headers, CacheExplainHeaders, CacheStatus};
use crate::index::MetadataIndex;
use crate::invalidate::{IndexStats, Invalidator};
use crate::key::CacheKey;
use crate::read::{Lookup, ReadEngine};
use crate::revalidate::{OriginContext, OriginHandler, Revalidator, TaskScheduler, TrackedScheduler};
use crate::write::{ContentHashEtag, EtagGenerator, WriteEngine, WriteOutcome};

/// A response produced by [`HttpCache::handle`].
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub response: CacheResponse,
    pub status: CacheStatus,
    pub key: CacheKey,
}

/// HTTP cache over a key-value store.
///
/// Cloning is cheap; clones share the store, indices and counters.
///
/// # Example
///
/// ```ignore
/// let cache = HttpCache::builder(Arc::new(MemoryStore::new()))
///     .with_config(CacheConfig::default().with_default_ttl(Duration::from_secs(60)))
///     .build();
///
/// let origin: Arc<dyn OriginHandler> = Arc::new(|req: CacheRequest, _ctx: OriginContext| async move {
///     Ok(CacheResponse::ok("hello").with_header("cache-control", "max-age=60"))
/// });
///
/// let outcome = cache.handle(CacheRequest::get("https://shop.example/")?, origin).await?;
/// ```
#[derive(Clone)]
pub struct HttpCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<CacheConfig>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CacheLogger>,
    metrics: Arc<CacheMetrics>,
    index: Arc<MetadataIndex>,
    scheduler: Arc<dyn TaskScheduler>,
    reader: ReadEngine,
    writer: WriteEngine,
    revalidator: Revalidator,
    invalidator: Invalidator,
}

impl HttpCache {
    /// Start building a cache over `store`.
    pub fn builder(store: Arc<dyn Store>) -> HttpCacheBuilder {
        HttpCacheBuilder::new(store)
    }

    /// A cache over `store` with default collaborators.
    pub fn new(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        Self::builder(store).with_config(config).build()
    }

    /// Serve a request from the cache, calling the origin when needed.
    ///
    /// Only a failing store read or a failing origin call on a miss is an
    /// error. Failed writes are logged and the origin response is returned.
    pub async fn handle(
        &self,
        request: CacheRequest,
        handler: Arc<dyn OriginHandler>,
    ) -> CacheResult<CacheOutcome> {
        let lookup = self.inner.reader.lookup(&request).await?;

        if !lookup.key.is_storable() {
            let mut response = handler
                .fetch(request, OriginContext::miss())
                .await
                .map_err(CacheError::Origin)?;
            strip_internal_headers(&mut response);
            return Ok(self.finish(response, CacheStatus::Bypass, lookup.key, None));
        }

        let status = lookup.status();
        let ttl_remaining = lookup.ttl_remaining;
        let needs_revalidation = lookup.needs_revalidation;
        let Lookup { key, response, .. } = lookup;

        if let Some(cached) = response {
            if !needs_revalidation {
                return Ok(self.finish(cached, status, key, ttl_remaining));
            }

            // Lookups never ask for revalidation with SWR off.
            if self.inner.config.swr == SwrMode::Blocking {
                let refreshed = self
                    .inner
                    .revalidator
                    .revalidate_blocking(&request, &key, handler.as_ref())
                    .await;
                return Ok(match refreshed {
                    Some(fresh) => self.finish(fresh, CacheStatus::Revalidated, key, None),
                    None => self.finish(cached, CacheStatus::Stale, key, ttl_remaining),
                });
            }

            self.inner
                .revalidator
                .spawn_background(request, &key, handler);
            return Ok(self.finish(cached, CacheStatus::Stale, key, ttl_remaining));
        }

        let response = handler
            .fetch(request.clone(), OriginContext::miss())
            .await
            .map_err(CacheError::Origin)?;

        // A response declaring a new vary rule is stored under a key the
        // lookup could not derive yet.
        let (response, key) = match self.inner.writer.write(&request, response.clone()).await {
            Ok(outcome) => (outcome.response, outcome.key.unwrap_or(key)),
            Err(e) => {
                self.inner
                    .logger
                    .error("failed to store origin response")
                    .field("key", key.display_form())
                    .error(&e)
                    .emit();
                let mut response = response;
                strip_internal_headers(&mut response);
                (response, key)
            }
        };

        Ok(self.finish(response, CacheStatus::Miss, key, None))
    }

    /// Look up a request without calling the origin.
    ///
    /// Returns stale responses too; no revalidation is triggered.
    pub async fn lookup(&self, request: &CacheRequest) -> CacheResult<Option<CacheResponse>> {
        let lookup = self.inner.reader.lookup(request).await?;
        let status = lookup.status();
        let ttl_remaining = lookup.ttl_remaining;

        Ok(lookup
            .response
            .map(|response| self.finish(response, status, lookup.key, ttl_remaining).response))
    }

    /// Full lookup details for a request.
    pub async fn lookup_entry(&self, request: &CacheRequest) -> CacheResult<Lookup> {
        self.inner.reader.lookup(request).await
    }

    /// Store a response for a request if its headers allow it.
    pub async fn store(
        &self,
        request: &CacheRequest,
        response: CacheResponse,
    ) -> CacheResult<WriteOutcome> {
        self.inner.writer.write(request, response).await
    }

    /// Delete every entry carrying `tag`.
    pub async fn invalidate_tag(&self, tag: &str) -> CacheResult<usize> {
        self.inner.invalidator.invalidate_tag(tag).await
    }

    /// Delete every entry carrying any of `tags`.
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> CacheResult<usize> {
        self.inner.invalidator.invalidate_tags(tags).await
    }

    /// Delete every indexed entry at or below `path`.
    pub async fn invalidate_path(&self, path: &str) -> CacheResult<usize> {
        self.inner.invalidator.invalidate_path(path).await
    }

    /// Delete every indexed entry.
    pub async fn invalidate_all(&self) -> CacheResult<usize> {
        self.inner.invalidator.invalidate_all().await
    }

    /// Tag index statistics.
    pub async fn stats(&self) -> CacheResult<IndexStats> {
        self.inner.invalidator.stats().await
    }

    /// Drop vary index entries past their maximum age.
    pub async fn cleanup_vary_index(&self) -> CacheResult<usize> {
        self.inner.index.cleanup_vary().await
    }

    /// Wait for scheduled background revalidations.
    pub async fn flush(&self) {
        self.inner.scheduler.flush().await;
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The clock driving freshness decisions.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    fn finish(
        &self,
        mut response: CacheResponse,
        status: CacheStatus,
        key: CacheKey,
        ttl_remaining: Option<std::time::Duration>,
    ) -> CacheOutcome {
        if self.inner.config.debug_headers {
            let mut explain = CacheExplainHeaders::new().with_status(status).with_key(&key);
            if let Some(ttl) = ttl_remaining {
                explain = explain.with_ttl(ttl);
            }
            explain.apply(&mut response);
        }

        CacheOutcome {
            response,
            status,
            key,
        }
    }
}

/// Builder for [`HttpCache`].
pub struct HttpCacheBuilder {
    store: Arc<dyn Store>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CacheLogger>,
    scheduler: Arc<dyn TaskScheduler>,
    etag: Arc<dyn EtagGenerator>,
}

impl HttpCacheBuilder {
    /// Create a builder with default collaborators.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
            logger: Arc::new(TracingLogger),
            scheduler: Arc::new(TrackedScheduler::new()),
            etag: Arc::new(ContentHashEtag),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the logger.
    pub fn with_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Set the background task scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the ETag generator.
    pub fn with_etag_generator(mut self, etag: Arc<dyn EtagGenerator>) -> Self {
        self.etag = etag;
        self
    }

    /// Build the cache.
    pub fn build(self) -> HttpCache {
        let config = Arc::new(self.config);
        let metrics = Arc::new(CacheMetrics::new());
        let index = Arc::new(MetadataIndex::new(
            self.store.clone(),
            self.clock.clone(),
            self.logger.clone(),
            config.index.clone(),
        ));

        let reader = ReadEngine::new(
            self.store.clone(),
            self.clock.clone(),
            self.logger.clone(),
            metrics.clone(),
            index.clone(),
            config.clone(),
        );
        let writer = WriteEngine::new(
            self.store.clone(),
            self.clock.clone(),
            self.logger.clone(),
            metrics.clone(),
            index.clone(),
            config.clone(),
            self.etag,
        );
        let revalidator = Revalidator::new(
            writer.clone(),
            self.scheduler.clone(),
            self.logger.clone(),
            metrics.clone(),
        );
        let invalidator = Invalidator::new(
            self.store,
            self.logger.clone(),
            metrics.clone(),
            index.clone(),
        );

        HttpCache {
            inner: Arc::new(Inner {
                config,
                clock: self.clock,
                logger: self.logger,
                metrics,
                index,
                scheduler: self.scheduler,
                reader,
                writer,
                revalidator,
                invalidator,
            }),
        }
    }
}
