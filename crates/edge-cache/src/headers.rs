//! Header names the engine reads or writes, and cache debugging headers.

use std::fmt;
use std::time::Duration;

use edge_core::{CacheResponse, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Header names used by the engine. All lowercase.
pub mod header_names {
    /// General caching directives.
    pub const CACHE_CONTROL: &str = "cache-control";
    /// Edge-only caching directives; win over `cache-control`.
    pub const CDN_CACHE_CONTROL: &str = "cdn-cache-control";
    /// Comma-separated invalidation tags.
    pub const CACHE_TAG: &str = "cache-tag";
    /// Vary rule declared by the origin.
    pub const CACHE_VARY: &str = "cache-vary";
    /// Standard vary header.
    pub const VARY: &str = "vary";
    /// Absolute expiry date.
    pub const EXPIRES: &str = "expires";
    /// Entity tag.
    pub const ETAG: &str = "etag";
    /// Last modification date.
    pub const LAST_MODIFIED: &str = "last-modified";
    /// Response date.
    pub const DATE: &str = "date";
    /// Seconds since the entry was stored.
    pub const AGE: &str = "age";
    /// Conditional request on entity tags.
    pub const IF_NONE_MATCH: &str = "if-none-match";
    /// Conditional request on modification date.
    pub const IF_MODIFIED_SINCE: &str = "if-modified-since";
    /// Cache status header (HIT, MISS, STALE, BYPASS, REVALIDATED).
    pub const X_CACHE_STATUS: &str = "x-cache-status";
    /// Cache key used for lookup.
    pub const X_CACHE_KEY: &str = "x-cache-key";
    /// Remaining TTL in seconds.
    pub const X_CACHE_TTL: &str = "x-cache-ttl";
}

/// Directive headers consumed by the engine and never forwarded to clients.
pub const INTERNAL_HEADERS: &[&str] = &[
    header_names::CDN_CACHE_CONTROL,
    header_names::CACHE_TAG,
    header_names::CACHE_VARY,
];

/// Remove the engine's directive headers from a response.
pub fn strip_internal_headers(response: &mut CacheResponse) {
    for name in INTERNAL_HEADERS {
        response.remove_header(name);
    }
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Served fresh from the cache.
    Hit,
    /// Served stale inside the stale-while-revalidate window.
    Stale,
    /// Fetched from the origin.
    Miss,
    /// Not eligible for caching.
    Bypass,
    /// Refreshed inline from the origin after going stale.
    Revalidated,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Stale => write!(f, "STALE"),
            Self::Miss => write!(f, "MISS"),
            Self::Bypass => write!(f, "BYPASS"),
            Self::Revalidated => write!(f, "REVALIDATED"),
        }
    }
}

/// Cache explain headers for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheExplainHeaders {
    /// Overall cache status.
    pub status: Option<CacheStatus>,
    /// Cache key used, with segment separators made printable.
    pub cache_key: Option<String>,
    /// Remaining TTL in seconds.
    pub ttl_secs: Option<u64>,
}

impl CacheExplainHeaders {
    /// Create new explain headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache status.
    pub fn with_status(mut self, status: CacheStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set cache key.
    pub fn with_key(mut self, key: &CacheKey) -> Self {
        self.cache_key = Some(key.display_form());
        self
    }

    /// Set TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    /// Convert to header pairs.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(status) = &self.status {
            headers.push((header_names::X_CACHE_STATUS, status.to_string()));
        }

        if let Some(key) = &self.cache_key {
            headers.push((header_names::X_CACHE_KEY, key.clone()));
        }

        if let Some(ttl) = self.ttl_secs {
            headers.push((header_names::X_CACHE_TTL, ttl.to_string()));
        }

        headers
    }

    /// Set the headers on a response, replacing previous values.
    pub fn apply(&self, response: &mut CacheResponse) {
        for (name, value) in self.to_headers() {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.set_header(http::HeaderName::from_static(name), value);
            }
        }
    }

    /// Convert to JSON for debugging endpoint.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Set the `age` header in whole seconds.
pub fn set_age(response: &mut CacheResponse, age: Duration) {
    response.set_header(http::header::AGE, HeaderValue::from(age.as_secs()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_internal_headers() {
        let mut response = CacheResponse::ok("")
            .with_header("Cache-Tag", "a")
            .with_header("cache-vary", "header=accept")
            .with_header("CDN-Cache-Control", "max-age=60")
            .with_header("cache-control", "max-age=5")
            .with_header("etag", "\"x\"");

        strip_internal_headers(&mut response);

        assert!(response.header("cache-tag").is_none());
        assert!(response.header("cache-vary").is_none());
        assert!(response.header("cdn-cache-control").is_none());
        assert_eq!(response.header("cache-control"), Some("max-age=5"));
        assert_eq!(response.header("etag"), Some("\"x\""));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Revalidated.to_string(), "REVALIDATED");
        assert_eq!(serde_json::to_string(&CacheStatus::Stale).unwrap(), "\"STALE\"");
    }

    #[test]
    fn test_explain_headers_apply() {
        let key = CacheKey::from("https://shop.example/a\u{1f}h:accept=json");
        let explain = CacheExplainHeaders::new()
            .with_status(CacheStatus::Miss)
            .with_key(&key)
            .with_ttl(Duration::from_secs(30));

        let mut response = CacheResponse::ok("")
            .with_header("x-cache-status", "HIT");
        explain.apply(&mut response);

        assert_eq!(response.header("x-cache-status"), Some("MISS"));
        assert_eq!(
            response.header("x-cache-key"),
            Some("https://shop.example/a|h:accept=json")
        );
        assert_eq!(response.header("x-cache-ttl"), Some("30"));
    }

    #[test]
    fn test_set_age() {
        let mut response = CacheResponse::ok("");
        set_age(&mut response, Duration::from_millis(12_900));
        assert_eq!(response.header("age"), Some("12"));
    }
}
