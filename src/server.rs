//! HTTP endpoints: the webhook receiver, manual claims, and health checks.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tracing::info;

use crate::dispatch::{ClaimDecision, Dispatcher, RequestMeta};
use crate::extract;

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Body accepted by the `/claim` endpoint.
#[derive(Serialize, Deserialize)]
struct ClaimBody {
    email: String,
    handle: String,
    hexpub: String,
}

/// Start an HTTP server exposing `/kofi-webhook`, `/claim`, and `/healthz`.
pub async fn serve_http(
    addr: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(Arc::new(dispatcher));
    info!(%addr, "webhook bridge listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/kofi-webhook", post(kofi_webhook))
        .route("/claim", post(claim))
        .with_state(dispatcher)
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Receive one platform notification.
///
/// The body is always answered empty with 200 or, on a token mismatch, 403;
/// parse and action failures are logged and audited but never change the
/// status.
async fn kofi_webhook(
    State(dispatcher): State<Arc<Dispatcher>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let meta = request_meta(remote, &method, &uri, &headers);
    let event = extract::extract_event(meta.content_type.as_deref(), &body);
    let outcome = dispatcher.handle_webhook(&meta, &event);
    StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK)
}

/// Manual claim for buyers whose webhook message lacked the handle/pubkey
/// pair. Requires an accepted claim purchase in the audit trail.
async fn claim(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let parsed: ClaimBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("malformed claim request: {err}")})),
            )
        }
    };
    match dispatcher.claim_for_email(&parsed.email, &parsed.handle, &parsed.hexpub) {
        ClaimDecision::Granted { handle, hexpub } => {
            (StatusCode::OK, Json(json!({"handle": handle, "hexpub": hexpub})))
        }
        ClaimDecision::Invalid(msg) => (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))),
        ClaimDecision::NoPurchase => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "no qualifying purchase for this email"})),
        ),
        ClaimDecision::StoreFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "directory update failed"})),
        ),
    }
}

/// Capture the transport details recorded in the audit trail.
fn request_meta(
    remote: SocketAddr,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> RequestMeta {
    let recorded = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    RequestMeta {
        remote_addr: remote.to_string(),
        method: method.to_string(),
        path: uri.path().to_string(),
        content_type: header_str(headers, "content-type"),
        headers: recorded,
        token_header: header_str(headers, "x-ko-fi-token"),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
