//! End-to-end worker behaviour through the host: install, activate, fetch
//! strategies and upgrades between cache generations.

mod common;

use std::sync::Arc;

use common::{ScriptedNetwork, config, get, text, url};
use offline_worker::{
    CacheStorage, DiskCacheStorage, Error, MemoryCacheStorage, Request, Response, ResponseType,
    WorkerHost, WorkerState,
};
use reqwest::{Method, StatusCode};
use serde_json::json;
use reqwest::Url;

type MemoryHost = WorkerHost<MemoryCacheStorage, ScriptedNetwork>;

fn memory_host() -> (MemoryHost, Arc<ScriptedNetwork>) {
    let network = Arc::new(ScriptedNetwork::new());
    let host = WorkerHost::new(Arc::new(MemoryCacheStorage::new()), Arc::clone(&network));
    (host, network)
}

/// Scripts the pages every test site has.
fn site(network: &ScriptedNetwork) {
    network.page(&url("/"), "home");
    network.page(&url("/offline.html"), "offline");
    network.page(&url("/logo.png"), "png");
}

#[tokio::test]
async fn static_assets_are_served_without_the_network() {
    let (host, network) = memory_host();
    site(&network);

    let state = host
        .register(config("v1", &["/", "/offline.html", "/logo.png"]))
        .await
        .unwrap();
    assert_eq!(state, WorkerState::Activated);
    assert_eq!(network.calls(), 3);

    let logo = host.fetch(&get("/logo.png")).await.unwrap();
    assert_eq!(text(&logo), "png");
    assert_eq!(network.calls(), 3);

    network.set_online(false);
    let home = host.fetch(&get("/")).await.unwrap();
    assert_eq!(text(&home), "home");
    assert_eq!(network.calls(), 3);
}

#[tokio::test]
async fn same_origin_page_is_cached_on_first_fetch() {
    let (host, network) = memory_host();
    site(&network);
    network.page(&url("/news.html"), "news");
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let first = host.fetch(&get("/news.html")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(text(&first), "news");
    let calls = network.calls();

    network.set_online(false);
    let second = host.fetch(&get("/news.html")).await.unwrap();
    assert_eq!(text(&second), "news");
    assert_eq!(network.calls(), calls);
    assert!(
        host.caches()
            .requests("v1")
            .await
            .unwrap()
            .contains(&url("/news.html").to_string())
    );
}

#[tokio::test]
async fn not_found_pages_are_not_cached() {
    let (host, network) = memory_host();
    site(&network);
    network.route(&url("/gone.html"), StatusCode::NOT_FOUND, ResponseType::Basic, "nope");
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let response = host.fetch(&get("/gone.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(
        !host.caches()
            .requests("v1")
            .await
            .unwrap()
            .contains(&url("/gone.html").to_string())
    );
}

#[tokio::test]
async fn cross_origin_failure_without_cache_is_an_error() {
    let (host, network) = memory_host();
    site(&network);
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let photo = Request::get(Url::parse("https://cdn.example/photo.jpg").unwrap());
    let result = host.fetch(&photo).await;
    assert!(matches!(result, Err(Error::NoResponse(_))));
}

#[tokio::test]
async fn cross_origin_responses_are_not_stored() {
    let (host, network) = memory_host();
    site(&network);
    let font = Url::parse("https://cdn.example/font.woff2").unwrap();
    let tracker = Url::parse("https://ads.example/pixel.gif").unwrap();
    network.route(&font, StatusCode::OK, ResponseType::Cors, "font");
    network.route(&tracker, StatusCode::OK, ResponseType::Opaque, "gif");
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let live = host.fetch(&Request::get(font.clone())).await.unwrap();
    assert_eq!(text(&live), "font");
    host.fetch(&Request::get(tracker.clone())).await.unwrap();
    assert!(host.caches().match_in("v1", &Request::get(font.clone())).await.unwrap().is_none());

    network.set_online(false);
    assert!(host.fetch(&Request::get(font)).await.is_err());
    assert!(host.fetch(&Request::get(tracker)).await.is_err());
}

#[tokio::test]
async fn cross_origin_falls_back_to_an_existing_entry_when_offline() {
    let (host, network) = memory_host();
    site(&network);
    let feed = Url::parse("https://cdn.example/feed.json").unwrap();
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    host.caches()
        .put("v1", &Request::get(feed.clone()), Response::basic(StatusCode::OK, "stale"))
        .await
        .unwrap();

    network.set_online(false);
    let cached = host.fetch(&Request::get(feed)).await.unwrap();
    assert_eq!(text(&cached), "stale");
}

#[tokio::test]
async fn missing_html_offline_serves_the_offline_page() {
    let (host, network) = memory_host();
    site(&network);
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    network.set_online(false);

    let page = host.fetch(&get("/missing.html")).await.unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(text(&page), "offline");

    assert!(host.fetch(&get("/missing.png")).await.is_err());
}

#[tokio::test]
async fn failed_install_persists_nothing() {
    let (host, network) = memory_host();
    network.page(&url("/"), "home");
    network.route(&url("/a.html"), StatusCode::NOT_FOUND, ResponseType::Basic, "");

    let result = host.register(config("v1", &["/", "/a.html"])).await;
    assert!(matches!(
        result,
        Err(Error::AssetUnavailable { status, .. }) if status == StatusCode::NOT_FOUND
    ));
    assert!(host.caches().keys().await.unwrap().is_empty());
    assert!(host.status().await.active.is_none());
}

#[tokio::test]
async fn failed_upgrade_keeps_the_current_generation() {
    let (host, network) = memory_host();
    site(&network);
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let result = host
        .register(config("v2", &["/", "/offline.html", "/a.html"]))
        .await;
    assert!(result.is_err());
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v1".to_string()]);
    assert_eq!(host.status().await.active.unwrap().cache_name, "v1");

    network.set_online(false);
    assert_eq!(text(&host.fetch(&get("/")).await.unwrap()), "home");
}

#[tokio::test]
async fn upgrade_leaves_only_the_new_generation() {
    let (host, network) = memory_host();
    site(&network);
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    let v1 = host.active_id().await.unwrap();

    host.register(config("v2", &["/", "/offline.html"])).await.unwrap();
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v2".to_string()]);
    assert_ne!(host.active_id().await.unwrap(), v1);
}

#[tokio::test]
async fn upgrade_on_disk_leaves_only_the_new_generation() {
    let dir = tempfile::tempdir().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    site(&network);

    let host = WorkerHost::new(
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&network),
    );
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    host.register(config("v2", &["/", "/offline.html"])).await.unwrap();
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v2".to_string()]);

    // A fresh store over the same directory sees the surviving generation.
    let reopened = DiskCacheStorage::new(dir.path());
    assert_eq!(reopened.keys().await.unwrap(), vec!["v2".to_string()]);
    let home = reopened.match_in("v2", &get("/")).await.unwrap().unwrap();
    assert_eq!(text(&home), "home");
}

#[tokio::test]
async fn restart_while_offline_serves_the_disk_generation() {
    let dir = tempfile::tempdir().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    site(&network);
    let first = WorkerHost::new(
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&network),
    );
    first.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    drop(first);

    network.set_online(false);
    let restarted = WorkerHost::new(
        Arc::new(DiskCacheStorage::new(dir.path())),
        Arc::clone(&network),
    );
    assert!(restarted.register(config("v1", &["/", "/offline.html"])).await.is_err());
    assert_eq!(restarted.caches().keys().await.unwrap(), vec!["v1".to_string()]);

    let state = restarted
        .resume(config("v1", &["/", "/offline.html"]))
        .await
        .unwrap();
    assert_eq!(state, WorkerState::Activated);
    assert_eq!(text(&restarted.fetch(&get("/")).await.unwrap()), "home");
    assert_eq!(text(&restarted.fetch(&get("/missing.html")).await.unwrap()), "offline");
}

#[tokio::test]
async fn waiting_worker_activates_on_skip_waiting_message() {
    let (host, network) = memory_host();
    site(&network);
    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();

    let state = host
        .register(config("v2", &["/", "/offline.html"]).with_skip_waiting(false))
        .await
        .unwrap();
    assert_eq!(state, WorkerState::Installed);

    let status = host.status().await;
    assert_eq!(status.active.unwrap().cache_name, "v1");
    assert_eq!(status.waiting.unwrap().cache_name, "v2");
    assert_eq!(host.caches().keys().await.unwrap().len(), 2);

    assert!(!host.post_message(json!({"type": "PING"})).await.unwrap());
    assert!(host.status().await.waiting.is_some());

    assert!(host.post_message(json!({"type": "SKIP_WAITING"})).await.unwrap());
    let status = host.status().await;
    assert_eq!(status.active.unwrap().cache_name, "v2");
    assert!(status.waiting.is_none());
    assert_eq!(host.caches().keys().await.unwrap(), vec!["v2".to_string()]);
}

#[tokio::test]
async fn activation_claims_open_clients() {
    let (host, network) = memory_host();
    site(&network);

    let client = host.open_client().await;
    assert_eq!(host.controller_of(client).await, None);

    host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
    assert_eq!(host.controller_of(client).await, host.active_id().await);

    let status = host.status().await;
    assert_eq!(status.clients, 1);
    assert_eq!(status.controlled_clients, 1);

    assert!(host.close_client(client).await);
    assert!(!host.close_client(client).await);
}

mod non_get {
    use super::*;
    use proptest::prelude::*;

    fn method() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::POST),
            Just(Method::PUT),
            Just(Method::PATCH),
            Just(Method::DELETE),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn never_touches_the_cache(method in method(), path in "/[a-z]{1,8}(\\.html)?") {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let (host, network) = memory_host();
                site(&network);
                network.page(&url(&path), "written");
                host.register(config("v1", &["/", "/offline.html"])).await.unwrap();
                host.caches()
                    .put("v1", &Request::get(url(&path)), Response::basic(StatusCode::OK, "cached"))
                    .await
                    .unwrap();
                let before = host.caches().requests("v1").await.unwrap();
                let calls = network.calls();

                let request = Request::new(method, url(&path)).with_body("payload");
                let response = host.fetch(&request).await.unwrap();

                assert_eq!(text(&response), "written");
                assert_eq!(network.calls(), calls + 1);
                assert_eq!(host.caches().requests("v1").await.unwrap(), before);
                let stored = host.caches().match_in("v1", &Request::get(url(&path))).await.unwrap().unwrap();
                assert_eq!(text(&stored), "cached");
            });
        }
    }
}
