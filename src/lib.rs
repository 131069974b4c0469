//! offline-worker - An offline-first cache worker for small static sites.
//!
//! The worker sits between pages and the network. Same-origin requests and
//! the configured static assets are answered cache-first; everything else is
//! fetched network-first with a cache fallback. Each deployment names a new
//! cache generation; installing it caches the static assets as one batch and
//! activating it deletes every older generation.
//!
//! The cache store ([`CacheStorage`]) and the network ([`Fetcher`]) are
//! traits, and [`WorkerHost`] plays the part of the runtime that delivers
//! lifecycle, message and fetch events.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_worker::{MemoryCacheStorage, ReqwestFetcher, Request, WorkerConfig, WorkerHost};
//!
//! # async fn example() -> offline_worker::Result<()> {
//! let config = WorkerConfig::default().with_cache_name("site-v4");
//! let network = Arc::new(ReqwestFetcher::new(config.origin.clone()));
//! let host = WorkerHost::new(Arc::new(MemoryCacheStorage::new()), network);
//!
//! // Install (caching every static asset), then activate.
//! host.register(config.clone()).await?;
//!
//! // Served from cache from now on.
//! let response = host.fetch(&Request::get(config.resolve("/index.html")?)).await?;
//! println!("{} bytes", response.body().len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod host;
pub mod http;
pub mod scope;
#[cfg(feature = "server")]
pub mod server;
pub mod worker;

// Re-export main types for convenience
pub use cache::{CacheBackend, CacheStorage, DiskCacheStorage, MemoryCacheStorage, StoredEntry};
pub use config::{AppConfig, ServerConfig, StorageBackend, StorageConfig, WorkerConfig};
pub use error::{Error, Result};
pub use event::{ControlMessage, ExtendableEvent, FetchEvent, LifecycleEvent, MessageEvent};
pub use fetch::{Fetcher, ReqwestFetcher};
pub use host::{HostStatus, WorkerHost, WorkerState, WorkerStatus};
pub use http::{Request, Response, ResponseType};
pub use scope::WorkerScope;
pub use worker::{OfflineWorker, Strategy};
