//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do when a lookup lands inside the stale-while-revalidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwrMode {
    /// Serve stale and refresh through the scheduler.
    #[default]
    Background,
    /// Refresh inline, serving stale only if the origin fails.
    Blocking,
    /// Treat stale entries as expired.
    Off,
}

/// Tunables for conditional request handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionalOptions {
    /// Compare ETags ignoring the `W/` prefix.
    pub weak_validation: bool,
    /// Evaluate `if-modified-since` against `last-modified`.
    pub last_modified: bool,
    /// Hash the body into an ETag when the origin sent none.
    pub generate_etags: bool,
}

impl Default for ConditionalOptions {
    fn default() -> Self {
        Self {
            weak_validation: true,
            last_modified: true,
            generate_etags: true,
        }
    }
}

/// Conditional request support.
///
/// Configuration files may give either a boolean or a table of
/// [`ConditionalOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ConditionalRepr", into = "ConditionalRepr")]
pub enum ConditionalRequests {
    /// Never answer with 304 and never generate ETags.
    Disabled,
    /// Enabled with default options.
    #[default]
    Enabled,
    /// Enabled with explicit options.
    Custom(ConditionalOptions),
}

impl ConditionalRequests {
    /// Effective options, or `None` when disabled.
    pub fn options(&self) -> Option<ConditionalOptions> {
        match self {
            Self::Disabled => None,
            Self::Enabled => Some(ConditionalOptions::default()),
            Self::Custom(options) => Some(*options),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConditionalRepr {
    Flag(bool),
    Options(ConditionalOptions),
}

impl From<ConditionalRepr> for ConditionalRequests {
    fn from(repr: ConditionalRepr) -> Self {
        match repr {
            ConditionalRepr::Flag(true) => Self::Enabled,
            ConditionalRepr::Flag(false) => Self::Disabled,
            ConditionalRepr::Options(options) => Self::Custom(options),
        }
    }
}

impl From<ConditionalRequests> for ConditionalRepr {
    fn from(value: ConditionalRequests) -> Self {
        match value {
            ConditionalRequests::Disabled => Self::Flag(false),
            ConditionalRequests::Enabled => Self::Flag(true),
            ConditionalRequests::Custom(options) => Self::Options(options),
        }
    }
}

/// Metadata index and lock tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Prefix for every record the engine stores besides entries.
    pub key_prefix: String,
    /// Vary index size before oldest entries are evicted.
    pub max_vary_entries: usize,
    /// Age in seconds after which the cleanup sweep drops a vary entry.
    pub vary_max_age_secs: u64,
    /// Age in milliseconds after which a lock is considered abandoned.
    pub lock_timeout_ms: u64,
    /// Lock acquisition attempts before giving up.
    pub lock_max_attempts: u32,
    /// First backoff delay in milliseconds; doubles per attempt.
    pub lock_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub lock_max_delay_ms: u64,
    /// Pause between writing a lock and confirming ownership, in
    /// milliseconds. Must exceed the latency of a single store write, or
    /// two writers can both confirm. Zero yields to the scheduler once,
    /// which is only sound for a single-threaded in-process store.
    pub lock_settle_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            key_prefix: "__edge_cache__".to_string(),
            max_vary_entries: 1000,
            vary_max_age_secs: 86_400,
            lock_timeout_ms: 10_000,
            lock_max_attempts: 20,
            lock_base_delay_ms: 20,
            lock_max_delay_ms: 1000,
            lock_settle_ms: 10,
        }
    }
}

impl IndexConfig {
    /// Lock staleness timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Vary entry maximum age.
    pub fn vary_max_age(&self) -> Duration {
        Duration::from_secs(self.vary_max_age_secs)
    }
}

/// Cache engine configuration.
///
/// # Example
///
/// ```toml
/// default_ttl = 60
/// max_ttl = 86400
/// swr = "blocking"
/// conditional_requests = { weak_validation = false }
///
/// [index]
/// max_vary_entries = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL in seconds for responses that signal caching without a lifetime.
    pub default_ttl: Option<u64>,
    /// Upper bound in seconds for any computed TTL.
    pub max_ttl: Option<u64>,
    /// Honor `cdn-cache-control` over `cache-control`.
    pub cdn_cache_control: bool,
    /// Index the `cache-tag` header.
    pub cache_tags: bool,
    /// Honor the `cache-vary` header.
    pub vary_rules: bool,
    /// Fold the standard `vary` header into the vary rule.
    pub respect_vary_header: bool,
    /// Stale-while-revalidate policy.
    pub swr: SwrMode,
    /// Conditional request support.
    pub conditional_requests: ConditionalRequests,
    /// Add `x-cache-status` and `x-cache-key` to responses.
    pub debug_headers: bool,
    /// Metadata index tunables.
    pub index: IndexConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            max_ttl: None,
            cdn_cache_control: true,
            cache_tags: true,
            vary_rules: true,
            respect_vary_header: true,
            swr: SwrMode::Background,
            conditional_requests: ConditionalRequests::Enabled,
            debug_headers: false,
            index: IndexConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a JSON document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl.as_secs());
        self
    }

    /// Set the maximum TTL.
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = Some(ttl.as_secs());
        self
    }

    /// Set the stale-while-revalidate policy.
    pub fn with_swr(mut self, mode: SwrMode) -> Self {
        self.swr = mode;
        self
    }

    /// Set conditional request support.
    pub fn with_conditional_requests(mut self, conditional: ConditionalRequests) -> Self {
        self.conditional_requests = conditional;
        self
    }

    /// Enable debug headers.
    pub fn with_debug_headers(mut self, enabled: bool) -> Self {
        self.debug_headers = enabled;
        self
    }

    /// Replace the index configuration.
    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.swr, SwrMode::Background);
        assert!(config.cdn_cache_control);
        assert_eq!(config.default_ttl, None);
        assert_eq!(
            config.conditional_requests.options(),
            Some(ConditionalOptions::default())
        );
    }

    #[test]
    fn test_from_toml() {
        let config = CacheConfig::from_toml(
            r#"
            default_ttl = 30
            swr = "blocking"
            conditional_requests = false

            [index]
            max_vary_entries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.default_ttl, Some(30));
        assert_eq!(config.swr, SwrMode::Blocking);
        assert_eq!(config.conditional_requests, ConditionalRequests::Disabled);
        assert_eq!(config.index.max_vary_entries, 5);
        assert_eq!(config.index.lock_max_attempts, 20);
        assert_eq!(config.index.lock_settle_ms, 10);
    }

    #[test]
    fn test_conditional_options_table() {
        let config = CacheConfig::from_toml(
            r#"
            conditional_requests = { weak_validation = false }
            "#,
        )
        .unwrap();

        let options = config.conditional_requests.options().unwrap();
        assert!(!options.weak_validation);
        assert!(options.generate_etags);
    }

    #[test]
    fn test_from_json() {
        let config = CacheConfig::from_json(r#"{"max_ttl": 120, "swr": "off", "conditional_requests": true}"#)
            .unwrap();
        assert_eq!(config.max_ttl, Some(120));
        assert_eq!(config.swr, SwrMode::Off);
        assert_eq!(config.conditional_requests, ConditionalRequests::Enabled);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            CacheConfig::from_toml("swr = \"sometimes\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = CacheConfig::default()
            .with_default_ttl(Duration::from_secs(10))
            .with_max_ttl(Duration::from_secs(100))
            .with_swr(SwrMode::Off)
            .with_debug_headers(true);

        assert_eq!(config.default_ttl, Some(10));
        assert_eq!(config.max_ttl, Some(100));
        assert_eq!(config.swr, SwrMode::Off);
        assert!(config.debug_headers);
    }
}
