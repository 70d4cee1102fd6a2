//! Stored cache entries.

use std::time::{Duration, SystemTime};

use edge_core::{clock, Bytes, CacheResponse, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::headers::header_names;
use crate::key::CacheKey;

/// A response as persisted in the store.
///
/// Serialized as JSON with the body base64-encoded. Timestamps are
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    #[serde(with = "status_code")]
    pub status: StatusCode,
    pub status_text: String,
    /// Response headers in order, repeated names kept.
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
    pub stored_at: u64,
    /// Expiry time; `None` never expires.
    pub expires_at: Option<u64>,
    /// Stale-while-revalidate window in seconds.
    #[serde(default)]
    pub stale_while_revalidate: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Capture a response for storage.
    pub fn from_response(
        key: CacheKey,
        response: &CacheResponse,
        stored_at: SystemTime,
        ttl: Option<Duration>,
        stale_while_revalidate: Option<Duration>,
        tags: Vec<String>,
    ) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self {
            key,
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            body: response.body.clone(),
            stored_at: clock::to_millis(stored_at),
            expires_at: ttl.map(|ttl| clock::to_millis(stored_at + ttl)),
            stale_while_revalidate: stale_while_revalidate.map(|d| d.as_secs()),
            etag: response.header(header_names::ETAG).map(str::to_string),
            last_modified: response
                .header(header_names::LAST_MODIFIED)
                .map(str::to_string),
            tags,
        }
    }

    /// Serialize for the store.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a stored record.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Rebuild the response.
    pub fn to_response(&self) -> CacheResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        CacheResponse {
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone(),
        }
    }

    /// Expiry as a point in time.
    pub fn expires_at_time(&self) -> Option<SystemTime> {
        self.expires_at.map(clock::from_millis)
    }

    /// End of the stale-while-revalidate window.
    pub fn stale_until(&self) -> Option<SystemTime> {
        let expires_at = self.expires_at_time()?;
        let window = self.stale_while_revalidate?;
        Some(expires_at + Duration::from_secs(window))
    }

    /// Time since the entry was stored.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(clock::from_millis(self.stored_at))
            .unwrap_or_default()
    }

    /// Time left before expiry.
    pub fn ttl_remaining(&self, now: SystemTime) -> Option<Duration> {
        self.expires_at_time()
            .map(|expires| expires.duration_since(now).unwrap_or_default())
    }
}

mod status_code {
    use edge_core::StatusCode;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(deserializer)?;
        StatusCode::from_u16(code).map_err(D::Error::custom)
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use edge_core::Bytes;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
