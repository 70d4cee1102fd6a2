//! Cache key derivation.
//!
//! A key starts with the request origin and path. Without a vary rule the
//! whole query string follows in canonical (sorted) form. With a rule, each
//! varying dimension is appended as its own segment, introduced by the unit
//! separator `0x1F`. A serialized URL never contains that byte and every
//! name and value is percent-encoded, so no crafted URL or header can forge
//! a vary-qualified key.

use std::fmt;

use edge_core::{CacheRequest, Url};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::policy::VaryRule;

/// Separator between key segments.
pub const SEGMENT_SEPARATOR: char = '\u{1f}';

const BYPASS_MARKER: &str = "\u{1f}bypass\u{1f}";

/// A cache key uniquely identifying a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an entry may be stored under this key.
    ///
    /// Keys derived for non-`GET` requests are not storable.
    pub fn is_storable(&self) -> bool {
        !self.0.starts_with(BYPASS_MARKER)
    }

    /// URL path the key was derived from.
    pub fn path(&self) -> Option<String> {
        path_of_key(&self.0)
    }

    /// The key with segment separators replaced by `|`, for headers and logs.
    pub fn display_form(&self) -> String {
        self.0.replace(SEGMENT_SEPARATOR, "|")
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_form())
    }
}

/// Derive the key for a request under an optional vary rule.
pub fn derive_key(request: &CacheRequest, rule: Option<&VaryRule>) -> CacheKey {
    if !request.is_cacheable_method() {
        return CacheKey(format!("{}{} {}", BYPASS_MARKER, request.method, request.url));
    }

    let mut key = base(&request.url);

    let Some(rule) = rule else {
        push_query(&mut key, canonical_query(&request.url, None));
        return CacheKey(key);
    };

    if rule.query_names.is_empty() {
        push_query(&mut key, canonical_query(&request.url, None));
    } else {
        key.push(SEGMENT_SEPARATOR);
        key.push_str("q:");
        key.push_str(&canonical_query(&request.url, Some(&rule.query_names)));
    }

    if !rule.header_names.is_empty() {
        key.push(SEGMENT_SEPARATOR);
        key.push_str("h:");
        key.push_str(&segment(&rule.header_names, |name| request.header_joined(name)));
    }

    if !rule.cookie_names.is_empty() {
        key.push(SEGMENT_SEPARATOR);
        key.push_str("c:");
        key.push_str(&segment(&rule.cookie_names, |name| request.cookie(name)));
    }

    CacheKey(key)
}

/// Origin and path of a URL, used to index vary rules.
///
/// The query is left out so a rule that varies on some query parameters is
/// found for every query string of the resource.
pub fn resource_key(url: &Url) -> String {
    base(url)
}

/// Recover the URL path from a stored key.
///
/// Returns `None` for bypass keys and anything that does not start with an
/// absolute URL.
pub fn path_of_key(key: &str) -> Option<String> {
    if key.starts_with(BYPASS_MARKER) {
        return None;
    }

    let prefix = key.split(SEGMENT_SEPARATOR).next()?;
    Url::parse(prefix).ok().map(|url| url.path().to_string())
}

fn base(url: &Url) -> String {
    format!("{}{}", url.origin().ascii_serialization(), url.path())
}

fn push_query(key: &mut String, query: String) {
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }
}

/// Sorted, re-encoded query pairs, optionally restricted to `names`.
fn canonical_query(url: &Url, names: Option<&[String]>) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| names.map_or(true, |names| names.iter().any(|n| n == name)))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn segment(names: &[String], lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();

    sorted
        .into_iter()
        .map(|name| match lookup(name) {
            Some(value) => format!("{}={}", encode(name), encode(&value)),
            None => encode(name),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
