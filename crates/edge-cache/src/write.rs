//! Write path: interpret, persist and index origin responses.

use std::sync::Arc;
use std::time::Duration;

use edge_core::{header, CacheRequest, CacheResponse, Clock, HeaderValue};
use edge_kv::Store;
use edge_observability::{CacheCounter, CacheLogger, CacheMetrics};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::directives::{interpret, validate_tags, CachingDecision};
use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::headers::strip_internal_headers;
use crate::index::MetadataIndex;
use crate::key::{derive_key, CacheKey};

/// Computes an ETag for a response body that came without one.
pub trait EtagGenerator: Send + Sync {
    /// Return a complete entity tag, quotes included.
    fn generate(&self, body: &[u8]) -> String;
}

/// Strong ETag from the SHA-256 digest of the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashEtag;

impl EtagGenerator for ContentHashEtag {
    fn generate(&self, body: &[u8]) -> String {
        format!("\"{}\"", hex::encode(Sha256::digest(body)))
    }
}

impl<F> EtagGenerator for F
where
    F: Fn(&[u8]) -> String + Send + Sync,
{
    fn generate(&self, body: &[u8]) -> String {
        self(body)
    }
}

/// Result of feeding a response through the write path.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Response to return to the client, internal headers removed.
    pub response: CacheResponse,
    /// Key the entry was stored under, if it was stored.
    pub key: Option<CacheKey>,
    /// How the response headers were interpreted.
    pub decision: CachingDecision,
}

impl WriteOutcome {
    /// Whether an entry was written.
    pub fn stored(&self) -> bool {
        self.key.is_some()
    }
}

/// Persists cacheable responses and keeps the indices current.
#[derive(Clone)]
pub struct WriteEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn CacheLogger>,
    metrics: Arc<CacheMetrics>,
    index: Arc<MetadataIndex>,
    config: Arc<CacheConfig>,
    etag: Arc<dyn EtagGenerator>,
}

impl WriteEngine {
    /// Create a write engine.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn CacheLogger>,
        metrics: Arc<CacheMetrics>,
        index: Arc<MetadataIndex>,
        config: Arc<CacheConfig>,
        etag: Arc<dyn EtagGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            logger,
            metrics,
            index,
            config,
            etag,
        }
    }

    /// Interpret a response and store it when its headers allow.
    ///
    /// Invalid tags fail the write before anything is stored.
    pub async fn write(&self, request: &CacheRequest, mut response: CacheResponse) -> CacheResult<WriteOutcome> {
        let now = self.clock.now();
        let decision = interpret(&response.headers, &self.config, now);
        strip_internal_headers(&mut response);

        let ttl = match decision.ttl_seconds {
            Some(ttl) if decision.should_cache && request.is_cacheable_method() => ttl,
            _ => {
                return Ok(WriteOutcome {
                    response,
                    key: None,
                    decision,
                })
            }
        };

        validate_tags(&decision.tags)?;

        if decision.should_generate_etag {
            let etag = self.etag.generate(&response.body);
            if let Ok(value) = HeaderValue::from_str(&etag) {
                response.set_header(header::ETAG, value);
            }
        }

        let ttl = Duration::from_secs(ttl);
        let key = derive_key(request, decision.vary.as_ref());

        let mut stored = response.clone();
        if let Ok(expires) = HeaderValue::from_str(&httpdate::fmt_http_date(now + ttl)) {
            stored.set_header(header::EXPIRES, expires);
        }

        let entry = CacheEntry::from_response(
            key.clone(),
            &stored,
            now,
            Some(ttl),
            decision.stale_while_revalidate_seconds.map(Duration::from_secs),
            decision.tags.clone(),
        );
        self.store.put(key.as_str(), entry.encode()?).await?;
        self.metrics.incr(CacheCounter::Store);

        self.index.add_key_to_tags(&key, &decision.tags).await?;

        match &decision.vary {
            Some(rule) => {
                self.index.record_vary(&request.url, rule).await?;
            }
            None => {
                self.index.forget_vary(&request.url).await?;
            }
        }

        self.logger
            .debug("stored cache entry")
            .field("key", key.display_form())
            .field_u64("ttl", ttl.as_secs())
            .field_u64("tags", decision.tags.len() as u64)
            .emit();

        Ok(WriteOutcome {
            response,
            key: Some(key),
            decision,
        })
    }
}
