//! Network abstraction for testability.

use async_trait::async_trait;
use reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use url::Url;

use crate::error::Result;
use crate::http::{Request, Response, ResponseType};

/// The live network as seen by the worker.
///
/// `Err` means the request never produced a response (offline, DNS failure,
/// connection reset). Any HTTP status, including 4xx and 5xx, is `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs a live fetch for `request`.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default network implementation using `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    origin: Url,
}

impl ReqwestFetcher {
    /// Creates a fetcher that classifies responses relative to `origin`.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self::with_client(reqwest::Client::new(), origin)
    }

    /// Creates a fetcher with a preconfigured client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, origin: Url) -> Self {
        Self { client, origin }
    }

    /// Classifies a response the way a page on `origin` would see it.
    fn classify(&self, request: &Request, response: &reqwest::Response) -> ResponseType {
        if request.is_same_origin(&self.origin) {
            return ResponseType::Basic;
        }
        let shared = response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|allowed| {
                allowed == "*" || allowed == self.origin.origin().ascii_serialization()
            });
        if shared {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }
        let response = builder.send().await?;

        let kind = self.classify(request, &response);
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Response::new(status, headers, body, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderValue;
    use axum::routing::get;
    use reqwest::StatusCode;

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn fetcher(origin: Url) -> ReqwestFetcher {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        ReqwestFetcher::with_client(client, origin)
    }

    fn router() -> Router {
        Router::new()
            .route("/page.html", get(|| async { "<h1>hi</h1>" }))
            .route(
                "/shared.png",
                get(|| async {
                    (
                        [(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
                        "png",
                    )
                }),
            )
            .route("/private.png", get(|| async { "png" }))
    }

    #[tokio::test]
    async fn same_origin_is_basic() {
        let base = serve(router()).await;
        let fetcher = fetcher(base.clone());

        let response = fetcher
            .fetch(&Request::get(base.join("/page.html").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.response_type(), ResponseType::Basic);
        assert_eq!(&response.body()[..], b"<h1>hi</h1>");
    }

    #[tokio::test]
    async fn missing_route_is_ok_with_404() {
        let base = serve(router()).await;
        let fetcher = fetcher(base.clone());

        let response = fetcher
            .fetch(&Request::get(base.join("/nope").unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cross_origin_classification() {
        let remote = serve(router()).await;
        let fetcher = fetcher(Url::parse("https://site.example/").unwrap());

        let shared = fetcher
            .fetch(&Request::get(remote.join("/shared.png").unwrap()))
            .await
            .unwrap();
        assert_eq!(shared.response_type(), ResponseType::Cors);

        let private = fetcher
            .fetch(&Request::get(remote.join("/private.png").unwrap()))
            .await
            .unwrap();
        assert_eq!(private.response_type(), ResponseType::Opaque);
    }

    #[tokio::test]
    async fn unreachable_host_is_err() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let fetcher = fetcher(base.clone());
        let result = fetcher.fetch(&Request::get(base)).await;
        assert!(result.unwrap_err().is_network());
    }
}
