//! Observability infrastructure for the edge HTTP cache.
//!
//! This crate provides:
//! - `CacheLogger` - Logging collaborator injected into each cache instance
//! - `TracingLogger` / `StructuredLogger` / `MemoryLogger` - Logger implementations
//! - `CacheMetrics` - Per-instance cache counters

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;
