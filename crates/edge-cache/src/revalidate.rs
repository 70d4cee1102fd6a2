//! Origin handlers, task scheduling and stale-while-revalidate refreshes.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use edge_core::{CacheRequest, CacheResponse};
use edge_observability::{CacheCounter, CacheLogger, CacheMetrics};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::headers::{header_names, strip_internal_headers};
use crate::key::CacheKey;
use crate::write::WriteEngine;

/// Why the origin is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Nothing servable was cached.
    Miss,
    /// A stale entry is being refreshed.
    Stale,
}

/// Context passed to an [`OriginHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginContext {
    pub mode: FetchMode,
    /// Whether the client already received a response.
    pub background: bool,
}

impl OriginContext {
    /// Context for a cache miss.
    pub fn miss() -> Self {
        Self {
            mode: FetchMode::Miss,
            background: false,
        }
    }

    /// Context for refreshing a stale entry.
    pub fn stale(background: bool) -> Self {
        Self {
            mode: FetchMode::Stale,
            background,
        }
    }
}

/// Produces responses the cache does not have.
#[async_trait]
pub trait OriginHandler: Send + Sync {
    /// Fetch a response for `request`.
    async fn fetch(&self, request: CacheRequest, context: OriginContext) -> anyhow::Result<CacheResponse>;
}

#[async_trait]
impl<F, Fut> OriginHandler for F
where
    F: Fn(CacheRequest, OriginContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CacheResponse>> + Send + 'static,
{
    async fn fetch(&self, request: CacheRequest, context: OriginContext) -> anyhow::Result<CacheResponse> {
        self(request, context).await
    }
}

/// Runs background work on behalf of the engine.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Run `task` eventually. Must not block on it.
    fn schedule(&self, task: BoxFuture<'static, ()>);

    /// Wait for every task scheduled so far.
    async fn flush(&self) {}
}

#[async_trait]
impl<F> TaskScheduler for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync,
{
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        self(task)
    }
}

/// Default scheduler.
///
/// Spawns tasks on the ambient tokio runtime and keeps their handles so
/// [`flush`](TaskScheduler::flush) can wait for them. Tasks scheduled
/// outside a runtime are queued and run by the next `flush`.
#[derive(Default)]
pub struct TrackedScheduler {
    running: Mutex<Vec<JoinHandle<()>>>,
    deferred: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl TrackedScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks spawned or queued and not yet flushed.
    pub fn pending(&self) -> usize {
        lock(&self.running).len() + lock(&self.deferred).len()
    }
}

#[async_trait]
impl TaskScheduler for TrackedScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut running = lock(&self.running);
                running.retain(|h| !h.is_finished());
                running.push(handle.spawn(task));
            }
            Err(_) => lock(&self.deferred).push(task),
        }
    }

    async fn flush(&self) {
        loop {
            let deferred: Vec<_> = std::mem::take(&mut *lock(&self.deferred));
            let running: Vec<_> = std::mem::take(&mut *lock(&self.running));
            if deferred.is_empty() && running.is_empty() {
                return;
            }

            for task in deferred {
                task.await;
            }
            for handle in running {
                // A panicking task has already reported itself.
                let _ = handle.await;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Refreshes stale entries through the write path.
#[derive(Clone)]
pub struct Revalidator {
    writer: WriteEngine,
    scheduler: Arc<dyn TaskScheduler>,
    logger: Arc<dyn CacheLogger>,
    metrics: Arc<CacheMetrics>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Revalidator {
    /// Create a revalidator.
    pub fn new(
        writer: WriteEngine,
        scheduler: Arc<dyn TaskScheduler>,
        logger: Arc<dyn CacheLogger>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            writer,
            scheduler,
            logger,
            metrics,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Schedule a background refresh of `key`.
    ///
    /// Returns `false` when a refresh of the same key is already running.
    /// Failures are logged and leave the stale entry in place.
    pub fn spawn_background(
        &self,
        request: CacheRequest,
        key: &CacheKey,
        handler: Arc<dyn OriginHandler>,
    ) -> bool {
        if !lock(&self.in_flight).insert(key.as_str().to_string()) {
            self.logger
                .debug("revalidation already in flight")
                .field("key", key.display_form())
                .emit();
            return false;
        }

        let guard = InFlight {
            set: self.in_flight.clone(),
            key: key.as_str().to_string(),
        };
        let this = self.clone();
        let key = key.clone();

        let task = async move {
            let _guard = guard;
            this.refresh(&request, &key, handler.as_ref(), true).await;
        }
        .boxed();

        self.scheduler.schedule(task);
        true
    }

    /// Refresh inline. Returns the fresh response, or `None` when the
    /// origin failed and the stale entry should be served.
    pub async fn revalidate_blocking(
        &self,
        request: &CacheRequest,
        key: &CacheKey,
        handler: &dyn OriginHandler,
    ) -> Option<CacheResponse> {
        self.refresh(request, key, handler, false).await
    }

    async fn refresh(
        &self,
        request: &CacheRequest,
        key: &CacheKey,
        handler: &dyn OriginHandler,
        background: bool,
    ) -> Option<CacheResponse> {
        let response = match handler
            .fetch(origin_request(request), OriginContext::stale(background))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.metrics.incr(CacheCounter::RevalidationFailure);
                self.logger
                    .error("revalidation origin call failed")
                    .field("key", key.display_form())
                    .field_bool("background", background)
                    .error(&e)
                    .emit();
                return None;
            }
        };

        match self.writer.write(request, response.clone()).await {
            Ok(outcome) => {
                self.metrics.incr(CacheCounter::Revalidation);
                Some(outcome.response)
            }
            Err(e) => {
                self.metrics.incr(CacheCounter::RevalidationFailure);
                self.logger
                    .error("revalidation write failed")
                    .field("key", key.display_form())
                    .field_bool("background", background)
                    .error(&e)
                    .emit();
                let mut response = response;
                strip_internal_headers(&mut response);
                Some(response)
            }
        }
    }
}

/// The client's request minus its validators. A refresh must fetch a full
/// response; a 304 from the origin would replace the entry with an empty body.
fn origin_request(request: &CacheRequest) -> CacheRequest {
    let mut request = request.clone();
    request.remove_header(header_names::IF_NONE_MATCH);
    request.remove_header(header_names::IF_MODIFIED_SINCE);
    request
}

/// Clears the in-flight mark when a refresh task ends, however it ends.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_closure_origin_handler() {
        let handler = |request: CacheRequest, context: OriginContext| async move {
            assert_eq!(context, OriginContext::miss());
            Ok::<_, anyhow::Error>(CacheResponse::ok(request.url.path().to_string()))
        };

        let response = handler
            .fetch(CacheRequest::get("https://shop.example/a").unwrap(), OriginContext::miss())
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"/a");
    }

    #[tokio::test]
    async fn test_tracked_scheduler_flush_waits() {
        let scheduler = TrackedScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            scheduler.schedule(
                async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }

        scheduler.flush().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_tracked_scheduler_defers_without_runtime() {
        let scheduler = TrackedScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let task_counter = counter.clone();
        scheduler.schedule(
            async move {
                task_counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(scheduler.flush());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_scheduler() {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let seen = scheduled.clone();
        let scheduler = move |_task: BoxFuture<'static, ()>| {
            seen.fetch_add(1, Ordering::SeqCst);
        };

        scheduler.schedule(async {}.boxed());
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_origin_request_drops_validators() {
        let request = CacheRequest::get("https://shop.example/a")
            .unwrap()
            .with_header("if-none-match", "\"v1\"")
            .with_header("if-modified-since", "Wed, 21 Oct 2015 07:28:00 GMT")
            .with_header("accept-language", "de");

        let forwarded = origin_request(&request);
        assert!(forwarded.header("if-none-match").is_none());
        assert!(forwarded.header("if-modified-since").is_none());
        assert_eq!(forwarded.header("accept-language"), Some("de"));
        assert_eq!(forwarded.url, request.url);
    }

    #[test]
    fn test_in_flight_guard_clears_on_drop() {
        let set = Arc::new(Mutex::new(HashSet::from(["k".to_string()])));
        drop(InFlight {
            set: set.clone(),
            key: "k".to_string(),
        });
        assert!(lock(&set).is_empty());
    }
}
