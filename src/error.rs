//! Error types for the offline-worker library.

use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Errors that can occur while handling worker events.
#[derive(Error, Debug)]
pub enum Error {
    /// Live network fetch failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error in the on-disk cache store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL could not be parsed or resolved against the worker origin.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Stored entry metadata could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A static asset returned a non-OK status during installation.
    #[error("Static asset unavailable: {url} ({status})")]
    AssetUnavailable {
        /// URL of the asset.
        url: String,
        /// Status the network returned for it.
        status: StatusCode,
    },

    /// Only GET requests may be stored in or read from the cache.
    #[error("Request method {0} cannot be cached")]
    MethodNotCacheable(Method),

    /// Cache generation names must be non-empty.
    #[error("Cache name cannot be empty")]
    EmptyCacheName,

    /// The fetch handler produced no response for the request.
    #[error("No response for {0}")]
    NoResponse(String),

    /// An event or lifecycle transition arrived in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the error came from the network rather than the cache
    /// store or the worker itself.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::NoResponse(_))
    }
}

/// A specialized `Result` type for offline-worker operations.
pub type Result<T> = std::result::Result<T, Error>;
