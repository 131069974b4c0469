//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use offline_worker::{Error, Fetcher, Request, Response, ResponseType, Result, WorkerConfig};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::Url;

pub const ORIGIN: &str = "https://site.example/";

/// Resolves `path` against [`ORIGIN`].
pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn get(path: &str) -> Request {
    Request::get(url(path))
}

/// Worker config for [`ORIGIN`] with the given generation and assets.
pub fn config(cache_name: &str, assets: &[&str]) -> WorkerConfig {
    WorkerConfig::new()
        .with_cache_name(cache_name)
        .with_origin(Url::parse(ORIGIN).unwrap())
        .with_static_assets(assets.iter().copied())
        .with_offline_page("/offline.html")
}

/// Network scripted per URL that can be switched off.
///
/// Unknown URLs and every URL while offline fail with
/// [`Error::NoResponse`].
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (StatusCode, ResponseType, String)>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl Default for ScriptedNetwork {
    fn default() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `url` with a 200 basic response carrying `body`.
    pub fn page(&self, url: &Url, body: &str) {
        self.route(url, StatusCode::OK, ResponseType::Basic, body);
    }

    pub fn route(&self, url: &Url, status: StatusCode, kind: ResponseType, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, kind, body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::NoResponse(request.url().to_string()));
        }
        let route = self.routes.lock().unwrap().get(request.url().as_str()).cloned();
        route
            .map(|(status, kind, body)| Response::new(status, HeaderMap::new(), body.into(), kind))
            .ok_or_else(|| Error::NoResponse(request.url().to_string()))
    }
}

/// Body of `response` as UTF-8.
pub fn text(response: &Response) -> String {
    String::from_utf8(response.body().to_vec()).unwrap()
}
