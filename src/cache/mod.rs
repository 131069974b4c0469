//! Generational request/response cache store.
//!
//! A store holds any number of named generations. Each generation maps GET
//! requests (URL without fragment, plus the request headers named by the
//! response's `Vary`) to response snapshots. The worker only ever writes to
//! the generation named in its configuration and deletes the others on
//! activation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, VARY};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{Request, Response, ResponseType};

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Abstraction over the cache store for testability.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the generation `name` if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if the generation `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Returns every generation name, oldest first.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes the generation `name`. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Looks up `request` in one generation.
    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>>;

    /// Stores `response` for `request` in `name`, replacing any entry the
    /// request matches. Creates the generation if needed.
    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()>;

    /// Stores every pair in `name` as a single unit: either all entries are
    /// visible afterwards or none are.
    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()>;

    /// Returns the URLs stored in `name`, sorted.
    async fn requests(&self, name: &str) -> Result<Vec<String>>;

    /// Looks up `request` in every generation, oldest first.
    async fn match_any(&self, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        for name in self.keys().await? {
            if let Some(response) = self.match_in(&name, request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// A stored response together with the request it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Request URL without fragment.
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub kind: ResponseType,
    pub stored_at: DateTime<Utc>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl StoredEntry {
    /// Snapshots a request/response pair. Only GET requests are accepted, and
    /// only the request headers named by the response's `Vary` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotCacheable`] for any other method.
    pub fn new(request: &Request, response: Response) -> Result<Self> {
        if !request.is_get() {
            return Err(Error::MethodNotCacheable(request.method().clone()));
        }
        let kind = response.response_type();
        let (status, headers, body) = response.into_parts();
        let varied = headers
            .get(VARY)
            .and_then(|v| v.to_str().ok())
            .map(get_headers_from_vary_header)
            .unwrap_or_default();
        let request_headers = header_pairs(request.headers())
            .into_iter()
            .filter(|(name, _)| varied.contains(name))
            .collect();
        Ok(Self {
            url: request.cache_url(),
            request_headers,
            status: status.as_u16(),
            headers: header_pairs(&headers),
            kind,
            stored_at: Utc::now(),
            body,
        })
    }

    /// Returns true if this entry answers a request for `url` carrying
    /// `request_headers`.
    #[must_use]
    pub fn matches(&self, url: &str, request_headers: &[(String, String)]) -> bool {
        if self.url != url {
            return false;
        }
        match get_header(VARY.as_str(), &self.headers) {
            Some(vary) => vary_header_matches(vary, request_headers, &self.request_headers),
            None => true,
        }
    }

    /// Returns true if this entry answers `request`.
    #[must_use]
    pub fn matches_request(&self, request: &Request) -> bool {
        request.is_get() && self.matches(&request.cache_url(), &header_pairs(request.headers()))
    }

    /// Rebuilds a response from the snapshot. Headers that no longer parse
    /// are dropped.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        Response::new(status, header_map(&self.headers), self.body.clone(), self.kind)
    }
}

/// Adds `entry` to `entries`, dropping any existing entry it replaces.
pub(crate) fn insert_entry(entries: &mut Vec<StoredEntry>, entry: StoredEntry) {
    entries.retain(|existing| !existing.matches(&entry.url, &entry.request_headers));
    entries.push(entry);
}

/// Check if headers, mentioned in the vary header, of query request
/// and cached request are equal. `*` never matches.
#[must_use]
pub fn vary_header_matches(
    vary_header: &str,
    query_request_headers: &[(String, String)],
    cached_request_headers: &[(String, String)],
) -> bool {
    let headers = get_headers_from_vary_header(vary_header);
    if headers.iter().any(|h| h == "*") {
        return false;
    }
    headers.iter().all(|header| {
        get_header(header, query_request_headers) == get_header(header, cached_request_headers)
    })
}

/// Get headers from the vary header.
#[must_use]
pub fn get_headers_from_vary_header(vary_header: &str) -> Vec<String> {
    vary_header
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Get value for the header with the given name.
#[must_use]
pub fn get_header<'a>(name: &str, headers: &'a [(String, String)]) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        Err(Error::EmptyCacheName)
    } else {
        Ok(())
    }
}

mod body_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Runtime-selected cache store.
pub enum CacheBackend {
    Memory(MemoryCacheStorage),
    Disk(DiskCacheStorage),
}

#[async_trait]
impl CacheStorage for CacheBackend {
    async fn open(&self, name: &str) -> Result<()> {
        match self {
            Self::Memory(cache) => cache.open(name).await,
            Self::Disk(cache) => cache.open(name).await,
        }
    }

    async fn has(&self, name: &str) -> Result<bool> {
        match self {
            Self::Memory(cache) => cache.has(name).await,
            Self::Disk(cache) => cache.has(name).await,
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        match self {
            Self::Memory(cache) => cache.keys().await,
            Self::Disk(cache) => cache.keys().await,
        }
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match self {
            Self::Memory(cache) => cache.delete(name).await,
            Self::Disk(cache) => cache.delete(name).await,
        }
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        match self {
            Self::Memory(cache) => cache.match_in(name, request).await,
            Self::Disk(cache) => cache.match_in(name, request).await,
        }
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        match self {
            Self::Memory(cache) => cache.put(name, request, response).await,
            Self::Disk(cache) => cache.put(name, request, response).await,
        }
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        match self {
            Self::Memory(cache) => cache.put_all(name, entries).await,
            Self::Disk(cache) => cache.put_all(name, entries).await,
        }
    }

    async fn requests(&self, name: &str) -> Result<Vec<String>> {
        match self {
            Self::Memory(cache) => cache.requests(name).await,
            Self::Disk(cache) => cache.requests(name).await,
        }
    }
}
