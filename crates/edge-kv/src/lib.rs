//! Key-value store contract for the edge HTTP cache.
//!
//! The cache engine layers TTLs, indices and locking on top of a store that
//! only offers independent `get`, `put` and `delete` calls on opaque keys.
//! Any platform cache, KV service or database can back the engine by
//! implementing [`Store`].
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_kv::{JsonStoreExt, MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! store.put_json("settings", &settings).await?;
//! let settings: Option<Settings> = store.get_json("settings").await?;
//! ```

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{JsonStoreExt, Store};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{JsonStoreExt, MemoryStore, Store, StoreError};
}
