//! Conditional request validation.

use std::time::SystemTime;

use edge_core::{header, CacheRequest, CacheResponse, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ConditionalOptions;
use crate::entry::CacheEntry;
use crate::headers::header_names;

/// Headers a 304 response must carry when the stored response had them.
pub const REQUIRED_304_HEADERS: &[&str] = &[
    "cache-control",
    "content-location",
    "date",
    "etag",
    "expires",
    "last-modified",
    "vary",
];

/// Representation headers copied to a 304 response when present.
pub const ALLOWED_304_HEADERS: &[&str] = &[
    "server",
    "content-encoding",
    "content-language",
    "content-type",
];

/// The validator that satisfied a conditional request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchedValidator {
    ETag,
    LastModified,
}

/// Outcome of comparing a conditional request to a stored entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub matches: bool,
    pub should_return_304: bool,
    pub matched_validator: Option<MatchedValidator>,
}

impl ValidationResult {
    fn matched(validator: MatchedValidator) -> Self {
        Self {
            matches: true,
            should_return_304: true,
            matched_validator: Some(validator),
        }
    }
}

/// Compare a request's conditional headers against a stored entry.
pub fn validate(
    request: &CacheRequest,
    entry: &CacheEntry,
    options: &ConditionalOptions,
) -> ValidationResult {
    let if_none_match = request.header_joined(header_names::IF_NONE_MATCH);
    let if_modified_since = request.header(header_names::IF_MODIFIED_SINCE);

    if if_none_match.is_none() && if_modified_since.is_none() {
        return ValidationResult::default();
    }

    if let Some(if_none_match) = if_none_match.as_deref() {
        if etag_matches(if_none_match, entry.etag.as_deref(), options.weak_validation) {
            return ValidationResult::matched(MatchedValidator::ETag);
        }
    }

    if options.last_modified {
        if let (Some(since), Some(modified)) = (if_modified_since, entry.last_modified.as_deref()) {
            if not_modified_since(modified, since) {
                return ValidationResult::matched(MatchedValidator::LastModified);
            }
        }
    }

    ValidationResult::default()
}

/// Whether an `if-none-match` value matches an entity tag.
///
/// The wildcard matches anything. Otherwise the value is a comma-separated
/// list of quoted tags, each optionally prefixed with `W/`; unquoted tokens
/// are ignored. Weak comparison ignores the `W/` prefix; strong comparison
/// requires both tags to be strong.
pub fn etag_matches(if_none_match: &str, etag: Option<&str>, weak_comparison: bool) -> bool {
    if if_none_match.trim() == "*" {
        return true;
    }

    let Some(etag) = etag else {
        return false;
    };
    let (entry_weak, entry_tag) = split_weak(etag.trim());
    let entry_tag = entry_tag
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(entry_tag);

    if_none_match
        .split(',')
        .filter_map(|token| parse_entity_tag(token.trim()))
        .any(|(weak, tag)| {
            tag == entry_tag && (weak_comparison || (!weak && !entry_weak))
        })
}

/// Build a 304 response from a stored response.
pub fn create_304(stored: &CacheResponse, now: SystemTime) -> CacheResponse {
    let mut response = CacheResponse::new(StatusCode::NOT_MODIFIED);

    for name in REQUIRED_304_HEADERS.iter().chain(ALLOWED_304_HEADERS) {
        for value in stored.headers.get_all(*name) {
            response = response.with_header(*name, value.clone());
        }
    }

    if !response.headers.contains_key(header::DATE) {
        if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(now)) {
            response.set_header(header::DATE, date);
        }
    }

    response
}

fn split_weak(tag: &str) -> (bool, &str) {
    match tag.strip_prefix("W/") {
        Some(rest) => (true, rest),
        None => (false, tag),
    }
}

fn parse_entity_tag(token: &str) -> Option<(bool, &str)> {
    let (weak, tag) = split_weak(token);
    let opaque = tag.strip_prefix('"')?.strip_suffix('"')?;
    Some((weak, opaque))
}

fn not_modified_since(last_modified: &str, since: &str) -> bool {
    match (
        httpdate::parse_http_date(last_modified.trim()),
        httpdate::parse_http_date(since.trim()),
    ) {
        (Ok(modified), Ok(since)) => modified <= since,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use edge_core::Bytes;

    use super::*;
    use crate::key::CacheKey;

    fn entry(etag: Option<&str>, last_modified: Option<&str>) -> CacheEntry {
        let mut response = CacheResponse::ok("body").with_header("content-type", "text/plain");
        if let Some(etag) = etag {
            response = response.with_header("etag", etag);
        }
        if let Some(lm) = last_modified {
            response = response.with_header("last-modified", lm);
        }
        CacheEntry::from_response(CacheKey::from("k"), &response, SystemTime::now(), None, None, Vec::new())
    }

    fn request(headers: &[(&str, &str)]) -> CacheRequest {
        let mut request = CacheRequest::get("https://shop.example/").unwrap();
        for (name, value) in headers {
            request = request.with_header(*name, *value);
        }
        request
    }

    #[test]
    fn test_no_conditional_headers() {
        let result = validate(&request(&[]), &entry(Some("\"v1\""), None), &ConditionalOptions::default());
        assert_eq!(result, ValidationResult::default());
    }

    #[test]
    fn test_etag_match() {
        let result = validate(
            &request(&[("if-none-match", "\"v0\", \"v1\"")]),
            &entry(Some("\"v1\""), None),
            &ConditionalOptions::default(),
        );
        assert!(result.should_return_304);
        assert_eq!(result.matched_validator, Some(MatchedValidator::ETag));
    }

    #[test]
    fn test_etag_mismatch() {
        let result = validate(
            &request(&[("if-none-match", "\"v2\"")]),
            &entry(Some("\"v1\""), None),
            &ConditionalOptions::default(),
        );
        assert!(!result.matches);
    }

    #[test]
    fn test_weak_and_strong_comparison() {
        assert!(etag_matches("W/\"v1\"", Some("\"v1\""), true));
        assert!(etag_matches("\"v1\"", Some("W/\"v1\""), true));
        assert!(!etag_matches("W/\"v1\"", Some("\"v1\""), false));
        assert!(!etag_matches("\"v1\"", Some("W/\"v1\""), false));
        assert!(etag_matches("\"v1\"", Some("\"v1\""), false));
    }

    #[test]
    fn test_wildcard_and_unquoted() {
        assert!(etag_matches("*", None, true));
        assert!(!etag_matches("v1", Some("\"v1\""), true));
        assert!(!etag_matches("\"v1\"", None, true));
    }

    #[test]
    fn test_last_modified() {
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let lm = httpdate::fmt_http_date(modified);
        let later = httpdate::fmt_http_date(modified + Duration::from_secs(10));
        let earlier = httpdate::fmt_http_date(modified - Duration::from_secs(10));
        let stored = entry(None, Some(&lm));

        let result = validate(&request(&[("if-modified-since", &later)]), &stored, &ConditionalOptions::default());
        assert_eq!(result.matched_validator, Some(MatchedValidator::LastModified));

        let result = validate(&request(&[("if-modified-since", &lm)]), &stored, &ConditionalOptions::default());
        assert!(result.should_return_304);

        let result = validate(&request(&[("if-modified-since", &earlier)]), &stored, &ConditionalOptions::default());
        assert!(!result.matches);

        let result = validate(&request(&[("if-modified-since", "garbage")]), &stored, &ConditionalOptions::default());
        assert!(!result.matches);

        let options = ConditionalOptions {
            last_modified: false,
            ..Default::default()
        };
        let result = validate(&request(&[("if-modified-since", &later)]), &stored, &options);
        assert!(!result.matches);
    }

    #[test]
    fn test_create_304() {
        let stored = CacheResponse::ok(Bytes::from_static(b"payload"))
            .with_header("etag", "\"v1\"")
            .with_header("content-type", "text/html")
            .with_header("cache-control", "max-age=60")
            .with_header("set-cookie", "a=1")
            .with_header("content-length", "7");

        let response = create_304(&stored, SystemTime::now());

        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert!(response.body.is_empty());
        assert_eq!(response.header("etag"), Some("\"v1\""));
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("cache-control"), Some("max-age=60"));
        assert!(response.header("set-cookie").is_none());
        assert!(response.header("content-length").is_none());
        assert!(response.header("date").is_some());
    }

    #[test]
    fn test_create_304_keeps_stored_date() {
        let stored = CacheResponse::ok("").with_header("date", "Wed, 21 Oct 2015 07:28:00 GMT");
        let response = create_304(&stored, SystemTime::now());
        assert_eq!(response.header("date"), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    }
}
