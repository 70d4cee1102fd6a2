//! Response header interpretation.
//!
//! Turns the caching headers of an origin response into a [`CachingDecision`].
//! Malformed directives are skipped one by one; interpretation never fails.

use std::time::SystemTime;

use edge_core::HeaderMap;

use crate::config::CacheConfig;
use crate::error::TagError;
use crate::headers::{header_names, INTERNAL_HEADERS};
use crate::policy::VaryRule;

/// Maximum number of tags a single response may declare.
pub const MAX_TAGS: usize = 100;

/// Maximum length of a single tag, in characters.
pub const MAX_TAG_LENGTH: usize = 100;

const FORBIDDEN_TAG_CHARS: &[char] = &['<', '>', '"', '\''];

/// Parsed `cache-control` style directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
}

impl Directives {
    /// Lifetime in seconds; `s-maxage` wins over `max-age`.
    pub fn lifetime(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }
}

/// Parse a directive list such as `public, max-age=60, stale-while-revalidate="30"`.
pub fn parse_directives(value: &str) -> Directives {
    let mut directives = Directives::default();

    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (name, argument) = match part.split_once('=') {
            Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
            None => (part, None),
        };
        let seconds = argument.and_then(|a| a.parse::<u64>().ok());

        match name.to_ascii_lowercase().as_str() {
            "public" => directives.public = true,
            "private" => directives.private = true,
            "no-cache" => directives.no_cache = true,
            "no-store" => directives.no_store = true,
            "max-age" => {
                if seconds.is_some() {
                    directives.max_age = seconds;
                }
            }
            "s-maxage" => {
                if seconds.is_some() {
                    directives.s_maxage = seconds;
                }
            }
            "stale-while-revalidate" => {
                if seconds.is_some() {
                    directives.stale_while_revalidate = seconds;
                }
            }
            _ => {}
        }
    }

    directives
}

/// Normalized caching decision for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachingDecision {
    /// Whether the response may be stored.
    pub should_cache: bool,
    /// Freshness lifetime in seconds.
    pub ttl_seconds: Option<u64>,
    /// Window after expiry during which the entry may be served stale.
    pub stale_while_revalidate_seconds: Option<u64>,
    /// Invalidation tags, deduplicated, in declaration order.
    pub tags: Vec<String>,
    /// Dimensions the cache key varies on.
    pub vary: Option<VaryRule>,
    pub is_private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    /// Validator sent by the origin.
    pub etag: Option<String>,
    /// Modification date sent by the origin.
    pub last_modified: Option<String>,
    /// Whether the write path should hash the body into an ETag.
    pub should_generate_etag: bool,
    /// Headers to remove before the response leaves the engine.
    pub headers_to_strip: Vec<&'static str>,
}

/// Interpret the caching headers of a response.
pub fn interpret(headers: &HeaderMap, config: &CacheConfig, now: SystemTime) -> CachingDecision {
    let override_value = if config.cdn_cache_control {
        joined(headers, header_names::CDN_CACHE_CONTROL)
    } else {
        None
    };
    let directive_value = override_value.or_else(|| joined(headers, header_names::CACHE_CONTROL));
    let directives = directive_value
        .as_deref()
        .map(parse_directives)
        .unwrap_or_default();

    let tags = if config.cache_tags {
        joined(headers, header_names::CACHE_TAG)
            .map(|v| parse_tags(&v))
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let expires_ttl = first(headers, header_names::EXPIRES).and_then(|v| expires_ttl(v, now));

    let has_signal = directive_value.is_some() || !tags.is_empty() || expires_ttl.is_some();

    let mut ttl_seconds = directives
        .lifetime()
        .or(expires_ttl)
        .or(config.default_ttl);
    if let (Some(ttl), Some(max)) = (ttl_seconds, config.max_ttl) {
        ttl_seconds = Some(ttl.min(max));
    }

    let (vary, vary_any) = vary_rule(headers, config);

    let etag = first(headers, header_names::ETAG).map(str::to_string);
    let last_modified = first(headers, header_names::LAST_MODIFIED).map(str::to_string);

    let should_cache = has_signal
        && !vary_any
        && !directives.private
        && !directives.no_cache
        && !directives.no_store
        && ttl_seconds.is_some_and(|ttl| ttl > 0);

    let generate_etags = config
        .conditional_requests
        .options()
        .is_some_and(|o| o.generate_etags);

    CachingDecision {
        should_cache,
        ttl_seconds,
        stale_while_revalidate_seconds: directives.stale_while_revalidate,
        tags,
        vary,
        is_private: directives.private,
        no_cache: directives.no_cache,
        no_store: directives.no_store,
        should_generate_etag: should_cache && generate_etags && etag.is_none(),
        etag,
        last_modified,
        headers_to_strip: INTERNAL_HEADERS.to_vec(),
    }
}

/// Split a `cache-tag` value into trimmed, non-empty, unique tags.
pub fn parse_tags(value: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Check a tag list against the count, length and character limits.
pub fn validate_tags(tags: &[String]) -> Result<(), TagError> {
    if tags.len() > MAX_TAGS {
        return Err(TagError::TooMany {
            count: tags.len(),
            max: MAX_TAGS,
        });
    }

    for tag in tags {
        let len = tag.chars().count();
        if len > MAX_TAG_LENGTH {
            return Err(TagError::TooLong {
                tag: tag.clone(),
                len,
                max: MAX_TAG_LENGTH,
            });
        }
        if let Some(character) = tag.chars().find(|c| FORBIDDEN_TAG_CHARS.contains(c)) {
            return Err(TagError::InvalidCharacter {
                tag: tag.clone(),
                character,
            });
        }
    }

    Ok(())
}

fn vary_rule(headers: &HeaderMap, config: &CacheConfig) -> (Option<VaryRule>, bool) {
    let mut rule = VaryRule::new();
    let mut vary_any = false;

    if config.vary_rules {
        if let Some(parsed) = joined(headers, header_names::CACHE_VARY).and_then(|v| VaryRule::parse(&v)) {
            rule.merge(parsed);
        }
    }

    if config.respect_vary_header {
        if let Some(value) = joined(headers, header_names::VARY) {
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if name == "*" {
                    vary_any = true;
                } else {
                    rule = rule.header(name);
                }
            }
        }
    }

    if rule.is_empty() {
        (None, vary_any)
    } else {
        (Some(rule), vary_any)
    }
}

fn expires_ttl(value: &str, now: SystemTime) -> Option<u64> {
    let expires = httpdate::parse_http_date(value.trim()).ok()?;
    Some(
        expires
            .duration_since(now)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
}

fn first<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn joined(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use edge_core::{HeaderName, HeaderValue};

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn decide(pairs: &[(&str, &str)]) -> CachingDecision {
        interpret(&headers(pairs), &CacheConfig::default(), SystemTime::now())
    }

    #[test]
    fn test_parse_directives() {
        let d = parse_directives("public, max-age=60, stale-while-revalidate=\"30\", bogus, max-age=abc");
        assert!(d.public);
        assert_eq!(d.max_age, Some(60));
        assert_eq!(d.stale_while_revalidate, Some(30));
        assert!(!d.no_store);
    }

    #[test]
    fn test_s_maxage_wins() {
        let d = parse_directives("max-age=10, s-maxage=100");
        assert_eq!(d.lifetime(), Some(100));
    }

    #[test]
    fn test_basic_cacheable() {
        let decision = decide(&[("cache-control", "public, max-age=60")]);
        assert!(decision.should_cache);
        assert_eq!(decision.ttl_seconds, Some(60));
        assert!(decision.should_generate_etag);
        assert_eq!(decision.headers_to_strip, INTERNAL_HEADERS.to_vec());
    }

    #[test]
    fn test_override_directive_wins() {
        let decision = decide(&[
            ("cache-control", "no-store"),
            ("cdn-cache-control", "max-age=120, stale-while-revalidate=60"),
        ]);
        assert!(decision.should_cache);
        assert_eq!(decision.ttl_seconds, Some(120));
        assert_eq!(decision.stale_while_revalidate_seconds, Some(60));
    }

    #[test]
    fn test_override_ignored_when_disabled() {
        let config = CacheConfig {
            cdn_cache_control: false,
            ..Default::default()
        };
        let decision = interpret(
            &headers(&[("cache-control", "no-store"), ("cdn-cache-control", "max-age=120")]),
            &config,
            SystemTime::now(),
        );
        assert!(!decision.should_cache);
        assert!(decision.no_store);
    }

    #[test]
    fn test_never_cached() {
        for value in ["max-age=0", "no-store, max-age=60", "private, max-age=60", "no-cache, max-age=60"] {
            let decision = decide(&[("cache-control", value)]);
            assert!(!decision.should_cache, "{} should not be cached", value);
        }
    }

    #[test]
    fn test_requires_explicit_signal() {
        let config = CacheConfig::default().with_default_ttl(Duration::from_secs(60));
        let decision = interpret(&headers(&[("content-type", "text/html")]), &config, SystemTime::now());
        assert!(!decision.should_cache);

        let decision = interpret(&headers(&[("cache-tag", "a")]), &config, SystemTime::now());
        assert!(decision.should_cache);
        assert_eq!(decision.ttl_seconds, Some(60));
    }

    #[test]
    fn test_signal_without_ttl_is_not_cached() {
        let decision = decide(&[("cache-control", "public")]);
        assert!(!decision.should_cache);
        assert_eq!(decision.ttl_seconds, None);
    }

    #[test]
    fn test_max_ttl_clamps() {
        let config = CacheConfig::default().with_max_ttl(Duration::from_secs(30));
        let decision = interpret(&headers(&[("cache-control", "max-age=600")]), &config, SystemTime::now());
        assert_eq!(decision.ttl_seconds, Some(30));
    }

    #[test]
    fn test_expires_header() {
        let now = SystemTime::now();
        let expires = httpdate::fmt_http_date(now + Duration::from_secs(90));
        let decision = interpret(&headers(&[("expires", &expires)]), &CacheConfig::default(), now);
        assert!(decision.should_cache);
        let ttl = decision.ttl_seconds.unwrap();
        assert!((89..=90).contains(&ttl));

        let past = httpdate::fmt_http_date(now - Duration::from_secs(90));
        let decision = interpret(&headers(&[("expires", &past)]), &CacheConfig::default(), now);
        assert!(!decision.should_cache);

        let decision = interpret(&headers(&[("expires", "not a date")]), &CacheConfig::default(), now);
        assert!(!decision.should_cache);
    }

    #[test]
    fn test_tags_and_vary() {
        let decision = decide(&[
            ("cache-control", "max-age=60"),
            ("cache-tag", " a, b ,, a,c "),
            ("cache-vary", "header=Accept-Language, cookie=currency, query=page"),
            ("vary", "Accept-Encoding"),
        ]);
        assert_eq!(decision.tags, vec!["a", "b", "c"]);

        let vary = decision.vary.unwrap();
        assert_eq!(vary.header_names, vec!["accept-language", "accept-encoding"]);
        assert_eq!(vary.cookie_names, vec!["currency"]);
        assert_eq!(vary.query_names, vec!["page"]);
    }

    #[test]
    fn test_vary_star_disables_caching() {
        let decision = decide(&[("cache-control", "max-age=60"), ("vary", "*")]);
        assert!(!decision.should_cache);
    }

    #[test]
    fn test_validators_extracted() {
        let decision = decide(&[
            ("cache-control", "max-age=60"),
            ("etag", "\"v1\""),
            ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]);
        assert_eq!(decision.etag.as_deref(), Some("\"v1\""));
        assert_eq!(decision.last_modified.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert!(!decision.should_generate_etag);
        assert!(!decision.headers_to_strip.contains(&"etag"));
    }

    #[test]
    fn test_validate_tags() {
        assert!(validate_tags(&["products".to_string()]).is_ok());

        let many: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{}", i)).collect();
        assert_eq!(
            validate_tags(&many),
            Err(TagError::TooMany { count: 101, max: 100 })
        );

        let long = "x".repeat(101);
        assert!(matches!(
            validate_tags(&[long]),
            Err(TagError::TooLong { len: 101, .. })
        ));

        assert_eq!(
            validate_tags(&["a<b".to_string()]),
            Err(TagError::InvalidCharacter {
                tag: "a<b".to_string(),
                character: '<'
            })
        );
    }
}
