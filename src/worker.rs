//! The offline cache worker: installer, activator, fetch dispatcher and
//! control channel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_worker::{MemoryCacheStorage, OfflineWorker, ReqwestFetcher, WorkerConfig};
//!
//! # async fn example() -> offline_worker::Result<()> {
//! let config = WorkerConfig::default();
//! let network = Arc::new(ReqwestFetcher::new(config.origin.clone()));
//! let worker = OfflineWorker::new(config, Arc::new(MemoryCacheStorage::new()), network);
//!
//! worker.install().await?;
//! worker.activate().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future;
use reqwest::StatusCode;

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::event::{ControlMessage, ExtendableEvent, FetchEvent, MessageEvent};
use crate::fetch::Fetcher;
use crate::http::{Request, Response, ResponseType};
use crate::scope::WorkerScope;

/// How a GET request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from cache; fetch and store only on a miss.
    CacheFirst,
    /// Fetch first; serve from cache only when the network fails.
    NetworkFirst,
}

/// One worker instance bound to a cache generation.
pub struct OfflineWorker<C, F> {
    config: Arc<WorkerConfig>,
    caches: Arc<C>,
    network: Arc<F>,
    scope: Arc<WorkerScope>,
}

impl<C, F> Clone for OfflineWorker<C, F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            caches: Arc::clone(&self.caches),
            network: Arc::clone(&self.network),
            scope: Arc::clone(&self.scope),
        }
    }
}

impl<C, F> OfflineWorker<C, F>
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    /// Creates a worker instance with a fresh scope.
    #[must_use]
    pub fn new(config: WorkerConfig, caches: Arc<C>, network: Arc<F>) -> Self {
        let scope = Arc::new(WorkerScope::new(config.origin.clone()));
        Self {
            config: Arc::new(config),
            caches,
            network,
            scope,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[must_use]
    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    #[must_use]
    pub fn caches(&self) -> &C {
        &self.caches
    }

    /// Install handler: holds the phase open while the static assets are
    /// cached.
    pub fn on_install(&self, event: &mut ExtendableEvent) {
        let worker = self.clone();
        event.wait_until(async move { worker.install().await });
        if self.config.skip_waiting {
            self.scope.skip_waiting();
        }
    }

    /// Activate handler: holds the phase open while stale generations are
    /// deleted, then claims open clients.
    pub fn on_activate(&self, event: &mut ExtendableEvent) {
        let worker = self.clone();
        event.wait_until(async move { worker.activate().await });
        self.scope.claim_clients();
    }

    /// Fetch handler. Non-GET requests are left to the host.
    pub fn on_fetch(&self, event: &mut FetchEvent) {
        let Some(strategy) = self.strategy_for(event.request()) else {
            return;
        };
        let worker = self.clone();
        let request = event.request().clone();
        if let Err(e) = event.respond_with(async move { worker.respond(strategy, &request).await }) {
            log::warn!("{e}");
        }
    }

    /// Message handler. Returns true if the message was a recognised command.
    pub fn on_message(&self, event: &MessageEvent) -> bool {
        match event.control() {
            Some(ControlMessage::SkipWaiting) => {
                log::info!("Received SKIP_WAITING");
                self.scope.skip_waiting();
                true
            }
            None => {
                log::debug!("Ignoring message {}", event.data());
                false
            }
        }
    }

    /// Fetches every static asset and stores them as one batch.
    ///
    /// # Errors
    ///
    /// Fails without writing anything if any asset cannot be fetched or
    /// answers with a non-OK status.
    pub async fn install(&self) -> Result<()> {
        let name = &self.config.cache_name;
        log::info!(
            "Installing {name}: caching {} static assets",
            self.config.static_assets.len()
        );

        let requests = self
            .config
            .static_assets
            .iter()
            .map(|path| self.config.resolve(path).map(Request::get))
            .collect::<Result<Vec<_>>>()?;
        let responses =
            future::try_join_all(requests.iter().map(|request| self.fetch_asset(request))).await?;

        self.caches
            .put_all(name, requests.into_iter().zip(responses).collect())
            .await?;
        log::info!("Installed {name}");
        Ok(())
    }

    async fn fetch_asset(&self, request: &Request) -> Result<Response> {
        let response = self.network.fetch(request).await?;
        if !response.ok() {
            return Err(Error::AssetUnavailable {
                url: request.url().to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    /// Deletes every cache generation other than the current one.
    ///
    /// Deletions run concurrently; one failing is logged and does not stop
    /// the others.
    ///
    /// # Errors
    ///
    /// Returns an error only if the generations cannot be listed.
    pub async fn activate(&self) -> Result<()> {
        let current = &self.config.cache_name;
        log::info!("Activating {current}");

        let stale: Vec<String> = self
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|key| key != current)
            .collect();

        let results = future::join_all(stale.iter().map(|key| async move {
            log::info!("Deleting old cache: {key}");
            (key, self.caches.delete(key).await)
        }))
        .await;

        for (key, result) in results {
            if let Err(e) = result {
                log::warn!("Failed to delete old cache {key}: {e}");
            }
        }
        Ok(())
    }

    /// Chooses a strategy for `request`, or `None` if the worker should not
    /// handle it at all.
    #[must_use]
    pub fn strategy_for(&self, request: &Request) -> Option<Strategy> {
        if !request.is_get() {
            return None;
        }
        if self.config.is_static_asset(request.path())
            || request.is_same_origin(self.scope.origin())
        {
            Some(Strategy::CacheFirst)
        } else {
            Some(Strategy::NetworkFirst)
        }
    }

    /// Answers `request` with `strategy`.
    ///
    /// # Errors
    ///
    /// Returns an error when neither the network nor the cache (nor, for
    /// HTML under cache-first, the offline page) can answer.
    pub async fn respond(&self, strategy: Strategy, request: &Request) -> Result<Response> {
        log::debug!("{strategy:?} {}", request.url());
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        let result = match self.caches.match_any(request).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => self.fetch_and_cache(request).await,
            Err(e) => Err(e),
        };

        match result {
            Err(e) if request.path().ends_with(".html") => self.offline_page(request, e).await,
            other => other,
        }
    }

    async fn fetch_and_cache(&self, request: &Request) -> Result<Response> {
        let response = self.network.fetch(request).await?;
        let storable =
            response.status() == StatusCode::OK && response.response_type() != ResponseType::Opaque;
        if !storable {
            return Ok(response);
        }
        self.store(request, response.duplicate()).await;
        Ok(response)
    }

    async fn offline_page(&self, request: &Request, error: Error) -> Result<Response> {
        let offline = Request::get(self.config.resolve(&self.config.offline_page)?);
        match self.caches.match_any(&offline).await {
            Ok(Some(page)) => {
                log::warn!("{} unavailable ({error}), serving offline page", request.url());
                Ok(page)
            }
            Ok(None) => {
                log::warn!("{} unavailable ({error}) and no offline page cached", request.url());
                Err(error)
            }
            Err(cache_error) => {
                log::warn!("Offline page lookup failed: {cache_error}");
                Err(error)
            }
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response> {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                if is_storable(&response) {
                    self.store(request, response.duplicate()).await;
                }
                return Ok(response);
            }
            Err(e) => e,
        };

        match self.caches.match_any(request).await {
            Ok(Some(cached)) => {
                log::info!("{} unreachable ({error}), serving cached copy", request.url());
                Ok(cached)
            }
            Ok(None) => Err(error),
            Err(cache_error) => {
                log::warn!("Cache lookup failed for {}: {cache_error}", request.url());
                Err(error)
            }
        }
    }

    /// Writes `response` into the current generation. Failures are logged;
    /// the caller already has its own copy.
    async fn store(&self, request: &Request, response: Response) {
        if let Err(e) = self
            .caches
            .put(&self.config.cache_name, request, response)
            .await
        {
            log::warn!("Failed to cache {}: {e}", request.url());
        }
    }
}

/// Network-first only stores same-origin 200 responses.
fn is_storable(response: &Response) -> bool {
    response.status() == StatusCode::OK && response.response_type() == ResponseType::Basic
}
