//! HTTP caching engine for edge functions.
//!
//! This crate provides:
//! - `HttpCache` - Read, origin and write flow over any `edge_kv::Store`
//! - `interpret` - Response headers to a normalized `CachingDecision`
//! - `derive_key` - Vary-aware cache keys
//! - `validate` / `create_304` - Conditional request handling
//! - `MetadataIndex` - Locked tag and vary indices shared by all writers
//! - `Revalidator` - Stale-while-revalidate refreshes under a `TaskScheduler`
//! - `Invalidator` - Purges by tag, path or everything
//! - `CachePolicy` - Origin-side helper that emits the directive headers
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use edge_cache::{CachePolicy, HttpCache, OriginContext, OriginHandler, VaryRule};
//! use edge_core::{CacheRequest, CacheResponse};
//! use edge_kv::MemoryStore;
//!
//! let cache = HttpCache::builder(Arc::new(MemoryStore::new())).build();
//!
//! let origin: Arc<dyn OriginHandler> = Arc::new(|_req: CacheRequest, _ctx: OriginContext| async move {
//!     Ok(CachePolicy::public(Duration::from_secs(300))
//!         .with_swr(Duration::from_secs(60))
//!         .vary_on(VaryRule::new().header("accept-language"))
//!         .with_tag("products")
//!         .apply(CacheResponse::ok("<html>...</html>")))
//! });
//!
//! let outcome = cache.handle(CacheRequest::get("https://shop.example/products")?, origin).await?;
//! cache.invalidate_tag("products").await?;
//! ```

mod config;
mod directives;
mod engine;
mod entry;
mod error;
mod headers;
mod index;
mod invalidate;
mod key;
mod policy;
mod read;
mod revalidate;
mod validator;
mod write;

pub use config::*;
pub use directives::*;
pub use engine::*;
pub use entry::*;
pub use error::*;
pub use headers::*;
pub use index::*;
pub use invalidate::*;
pub use key::*;
pub use policy::*;
pub use read::*;
pub use revalidate::*;
pub use validator::*;
pub use write::*;
