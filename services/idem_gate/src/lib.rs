//! HTTP gate for the deduplication layer.
//!
//! Wires the idempotency orchestrator to the transport contract: the client
//! token arrives in the `Idempotency-Key` header, the caller identity in
//! `X-User-Id`, and only creation endpoints are wrapped.

pub mod api;
pub mod error;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use idem_core::{DedupConfig, MemoryDurableStore, MemoryFastStore, Orchestrator};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Max request body size: 1 MiB
const MAX_BODY_BYTES: usize = 1_048_576;
/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    /// Constructed once at startup and injected; no globals.
    pub dedup: Arc<Orchestrator>,
    pub parties: Arc<RwLock<HashMap<String, serde_json::Value>>>,
    pub party_seq: Arc<AtomicU64>,
}

impl Default for AppState {
    fn default() -> Self {
        let dedup = Orchestrator::new(
            Some(Arc::new(MemoryFastStore::from_env())),
            Arc::new(MemoryDurableStore::new()),
            DedupConfig::from_env(),
        );
        Self {
            dedup: Arc::new(dedup),
            parties: Default::default(),
            party_seq: Default::default(),
        }
    }
}

pub fn app() -> Router {
    app_with_state(AppState::default())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/parties", post(api::create_party))
        .route("/v1/parties/:id", get(api::get_party))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(require_json_content_type))
        .with_state(state)
}

/// Middleware: reject POST/PUT requests without application/json content-type.
async fn require_json_content_type(req: Request, next: Next) -> Response {
    let json_ok = match req.method().as_str() {
        "POST" | "PUT" | "PATCH" => req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false),
        _ => true, // GET, DELETE, etc. don't need content-type
    };
    if !json_ok {
        return error::AppError::unsupported_media_type().into_response();
    }
    next.run(req).await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

pub mod test {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Spawn the server on a random port. Returns the address and a
    /// JoinHandle that keeps the server alive until dropped.
    pub async fn spawn() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let app = super::app();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, handle)
    }
}
