//! Vary rules and origin-side cache policies.

use std::time::Duration;

use edge_core::CacheResponse;
use serde::{Deserialize, Serialize};

use crate::headers::header_names;

/// Request dimensions a cached response varies on.
///
/// Header names are stored lowercase; cookie and query names are case
/// sensitive. Each list is an insertion-ordered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryRule {
    /// Request headers folded into the key.
    #[serde(default)]
    pub header_names: Vec<String>,
    /// Cookies folded into the key.
    #[serde(default)]
    pub cookie_names: Vec<String>,
    /// Query parameters folded into the key.
    #[serde(default)]
    pub query_names: Vec<String>,
}

impl VaryRule {
    /// Create an empty rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vary on a request header.
    pub fn header(mut self, name: impl AsRef<str>) -> Self {
        push_unique(&mut self.header_names, name.as_ref().trim().to_ascii_lowercase());
        self
    }

    /// Vary on a cookie.
    pub fn cookie(mut self, name: impl AsRef<str>) -> Self {
        push_unique(&mut self.cookie_names, name.as_ref().trim().to_string());
        self
    }

    /// Vary on a query parameter.
    pub fn query(mut self, name: impl AsRef<str>) -> Self {
        push_unique(&mut self.query_names, name.as_ref().trim().to_string());
        self
    }

    /// Whether the rule varies on nothing.
    pub fn is_empty(&self) -> bool {
        self.header_names.is_empty() && self.cookie_names.is_empty() && self.query_names.is_empty()
    }

    /// Add every dimension of `other`.
    pub fn merge(&mut self, other: VaryRule) {
        for name in other.header_names {
            push_unique(&mut self.header_names, name);
        }
        for name in other.cookie_names {
            push_unique(&mut self.cookie_names, name);
        }
        for name in other.query_names {
            push_unique(&mut self.query_names, name);
        }
    }

    /// Parse a `cache-vary` header value such as
    /// `header=accept-language, cookie=currency, query=page`.
    ///
    /// Malformed directives and unknown kinds are skipped. Returns `None`
    /// when nothing usable remains.
    pub fn parse(value: &str) -> Option<Self> {
        let mut rule = Self::new();

        for directive in value.split(',') {
            let Some((kind, name)) = directive.split_once('=') else {
                continue;
            };
            let name = name.trim().trim_matches('"').trim();
            if name.is_empty() {
                continue;
            }

            rule = match kind.trim().to_ascii_lowercase().as_str() {
                "header" => rule.header(name),
                "cookie" => rule.cookie(name),
                "query" => rule.query(name),
                _ => rule,
            };
        }

        if rule.is_empty() {
            None
        } else {
            Some(rule)
        }
    }

    /// Render as a `cache-vary` header value.
    pub fn to_header_value(&self) -> String {
        let headers = self.header_names.iter().map(|n| format!("header={}", n));
        let cookies = self.cookie_names.iter().map(|n| format!("cookie={}", n));
        let queries = self.query_names.iter().map(|n| format!("query={}", n));

        headers.chain(cookies).chain(queries).collect::<Vec<_>>().join(", ")
    }
}

fn push_unique(list: &mut Vec<String>, name: String) {
    if !name.is_empty() && !list.contains(&name) {
        list.push(name);
    }
}

/// Cache scope determining who can cache the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// Cacheable by CDN and browser (shared cache).
    Public,
    /// Cacheable by browser only (private cache).
    Private,
    /// No caching.
    #[default]
    None,
}

impl CacheScope {
    /// Get the Cache-Control directive for this scope.
    pub fn cache_control_directive(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::None => "no-store",
        }
    }
}

/// Caching policy an origin handler attaches to its response.
///
/// The policy renders the directive headers the engine interprets on write.
///
/// ```ignore
/// let response = CachePolicy::public(Duration::from_secs(60))
///     .with_swr(Duration::from_secs(300))
///     .vary_on(VaryRule::new().header("accept-language"))
///     .with_tag("products")
///     .apply(CacheResponse::ok(body));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Cache scope.
    pub scope: CacheScope,
    /// Time-to-live for cached responses.
    pub ttl: Duration,
    /// Stale-while-revalidate window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate: Option<Duration>,
    /// Emit `cdn-cache-control` instead of `cache-control`.
    pub cdn_only: bool,
    /// Vary rule for the cache key.
    pub vary: VaryRule,
    /// Cache tags for invalidation.
    pub tags: Vec<String>,
}

impl CachePolicy {
    /// A policy that forbids caching.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a public cache policy.
    pub fn public(ttl: Duration) -> Self {
        Self {
            scope: CacheScope::Public,
            ttl,
            ..Default::default()
        }
    }

    /// Create a private cache policy.
    pub fn private(ttl: Duration) -> Self {
        Self {
            scope: CacheScope::Private,
            ttl,
            ..Default::default()
        }
    }

    /// Set stale-while-revalidate window.
    pub fn with_swr(mut self, duration: Duration) -> Self {
        self.stale_while_revalidate = Some(duration);
        self
    }

    /// Target the edge cache only, leaving `cache-control` to the origin.
    pub fn cdn_only(mut self) -> Self {
        self.cdn_only = true;
        self
    }

    /// Add vary dimensions.
    pub fn vary_on(mut self, rule: VaryRule) -> Self {
        self.vary.merge(rule);
        self
    }

    /// Add a cache tag for invalidation.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Generate the directive header value.
    pub fn cache_control_header(&self) -> String {
        if self.scope == CacheScope::None {
            return "no-store".to_string();
        }

        let mut parts = vec![self.scope.cache_control_directive().to_string()];
        parts.push(format!("max-age={}", self.ttl.as_secs()));

        if let Some(swr) = self.stale_while_revalidate {
            parts.push(format!("stale-while-revalidate={}", swr.as_secs()));
        }

        parts.join(", ")
    }

    /// Attach the policy's headers to a response.
    pub fn apply(&self, response: CacheResponse) -> CacheResponse {
        let directive_header = if self.cdn_only {
            header_names::CDN_CACHE_CONTROL
        } else {
            header_names::CACHE_CONTROL
        };

        let mut response = response.with_header(directive_header, self.cache_control_header());

        if !self.tags.is_empty() {
            response = response.with_header(header_names::CACHE_TAG, self.tags.join(","));
        }

        if !self.vary.is_empty() {
            response = response.with_header(header_names::CACHE_VARY, self.vary.to_header_value());
        }

        response
    }
}
