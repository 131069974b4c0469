//! Configuration for the worker, its cache store and the HTTP front.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Default cache generation identifier. Bump the suffix on every deployment.
pub const DEFAULT_CACHE_NAME: &str = "hero-sports-cache-v3";

/// Default page served for HTML navigations that cannot be reached.
pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

const DEFAULT_STATIC_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/news.html",
    "/about.html",
    "/contact.html",
    "/admin.html",
    "/offline.html",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

/// Worker tunables: the current cache generation and what it must contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identifier of the current cache generation.
    pub cache_name: String,
    /// Origin the worker serves. Same-origin requests use cache-first.
    pub origin: Url,
    /// Paths that must be cached before installation succeeds.
    pub static_assets: Vec<String>,
    /// Path served when an HTML request cannot be fetched or found in cache.
    pub offline_page: String,
    /// Whether installation asks to skip the waiting phase straight away.
    /// When false, a waiting worker activates once a page posts
    /// `{"type": "SKIP_WAITING"}`.
    pub skip_waiting: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: Url::parse("http://127.0.0.1:8000/").expect("default origin is a valid URL"),
            static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| (*s).to_string()).collect(),
            offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
            skip_waiting: true,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache generation identifier.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Sets the worker origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the static asset list.
    #[must_use]
    pub fn with_static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the offline fallback page.
    #[must_use]
    pub fn with_offline_page(mut self, page: impl Into<String>) -> Self {
        self.offline_page = page.into();
        self
    }

    /// Sets whether installation skips the waiting phase.
    #[must_use]
    pub const fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    /// Returns true if `path` is one of the static assets.
    #[must_use]
    pub fn is_static_asset(&self, path: &str) -> bool {
        self.static_assets.iter().any(|asset| asset == path)
    }

    /// Resolves a site path against the worker origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined onto the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty cache name, a non-HTTP origin, or an
    /// asset path that is not absolute.
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(Error::EmptyCacheName);
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }
        if let Some(bad) = self.static_assets.iter().find(|a| !a.starts_with('/')) {
            return Err(Error::Config(format!(
                "static asset paths must start with '/': {bad}"
            )));
        }
        if !self.offline_page.starts_with('/') {
            return Err(Error::Config(format!(
                "offline page must start with '/': {}",
                self.offline_page
            )));
        }
        if !self.is_static_asset(&self.offline_page) {
            log::warn!(
                "Offline page {} is not a static asset; it will only be available once fetched",
                self.offline_page
            );
        }
        Ok(())
    }
}

/// HTTP front configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9723,
        }
    }
}

/// Which cache store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart.
    Memory,
    /// Persisted under [`StorageConfig::dir`].
    Disk,
}

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the disk backend.
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            backend: StorageBackend::Disk,
            dir: cache_dir.join("offline-worker"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Loads configuration from `path` if it exists, otherwise defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            log::info!("Loading config from {}", path.display());
            Self::load(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-worker")
            .join("config.toml")
    }
}
