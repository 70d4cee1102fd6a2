//! Core abstractions for the edge HTTP cache.
//!
//! This crate provides the fundamental types shared by the cache crates:
//! - `CacheRequest` - The request record the engine consumes
//! - `CacheResponse` - The response record the engine produces and stores
//! - `Clock` - Time source, with `SystemClock` and `ManualClock`

pub mod clock;
mod request;
mod response;

pub use clock::*;
pub use request::*;
pub use response::*;

pub use bytes::Bytes;
pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
pub use url::Url;
