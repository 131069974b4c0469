//! HTTP front: serves every request through the worker host.
//!
//! Routes:
//!
//! - `POST /__worker/message`: JSON body posted to the worker
//! - `GET /__worker/status`: registration snapshot
//! - anything else: dispatched as a fetch event

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use url::Url;

use crate::cache::CacheStorage;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::host::WorkerHost;
use crate::http::{Request, Response};

struct AppState<C, F> {
    host: Arc<WorkerHost<C, F>>,
    origin: Url,
}

impl<C, F> Clone for AppState<C, F> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            origin: self.origin.clone(),
        }
    }
}

#[derive(Serialize)]
struct MessageResponse {
    accepted: bool,
}

async fn post_message<C, F>(
    State(state): State<AppState<C, F>>,
    axum::Json(payload): axum::Json<serde_json::Value>,
) -> axum::response::Response
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    match state.host.post_message(payload).await {
        Ok(accepted) => axum::Json(MessageResponse { accepted }).into_response(),
        Err(e) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}

async fn status<C, F>(State(state): State<AppState<C, F>>) -> impl IntoResponse
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    axum::Json(state.host.status().await)
}

async fn proxy<C, F>(
    State(state): State<AppState<C, F>>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let url = match request_url(&state.origin, &uri) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    headers.remove(HOST);
    headers.remove(CONNECTION);

    let request = Request::new(method, url).with_headers(headers).with_body(body);
    match state.host.fetch(&request).await {
        Ok(response) => into_axum(response),
        Err(e) => {
            log::warn!("No response for {} {}: {e}", request.method(), request.url());
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Absolute-form targets keep their own origin; origin-form paths are
/// resolved against the worker origin.
fn request_url(origin: &Url, uri: &Uri) -> Result<Url> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        Ok(Url::parse(&uri.to_string())?)
    } else {
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        Ok(origin.join(path)?)
    }
}

fn into_axum(response: Response) -> axum::response::Response {
    let (status, mut headers, body) = response.into_parts();
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);
    (status, headers, body).into_response()
}

/// Builds the router for `host`, resolving relative requests against
/// `origin`.
pub fn router<C, F>(host: Arc<WorkerHost<C, F>>, origin: Url) -> Router
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__worker/message", post(post_message::<C, F>))
        .route("/__worker/status", get(status::<C, F>))
        .layer(cors)
        .fallback(proxy::<C, F>)
        .with_state(AppState { host, origin })
}

/// Serves `host` on `host_addr:port` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<C, F>(
    host: Arc<WorkerHost<C, F>>,
    origin: Url,
    host_addr: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()>
where
    C: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let addr: SocketAddr = format!("{host_addr}:{port}")
        .parse()
        .map_err(|e| crate::Error::Config(format!("invalid bind address {host_addr}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Serving {origin} on http://{}", listener.local_addr()?);

    axum::serve(listener, router(host, origin))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Server stopped");
    Ok(())
}
