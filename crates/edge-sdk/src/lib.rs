//! Public SDK for the edge HTTP cache.
//!
//! This crate re-exports the cache engine and its collaborators:
//!
//! ```ignore
//! use edge_sdk::prelude::*;
//!
//! let cache = HttpCache::builder(Arc::new(MemoryStore::new()))
//!     .with_logger(Arc::new(StructuredLogger::new()))
//!     .build();
//!
//! let outcome = cache.handle(request, origin).await?;
//! match outcome.status {
//!     CacheStatus::Hit | CacheStatus::Stale => {}
//!     _ => {}
//! }
//! ```

pub use edge_cache;
pub use edge_core;
pub use edge_kv;
pub use edge_observability;

/// Prelude for convenient imports.
pub mod prelude {
    pub use edge_cache::*;
    pub use edge_core::*;
    pub use edge_kv::prelude::*;
    pub use edge_observability::*;
}
