#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use pulse_common::types::AuditEntry;
use pulse_server::state::AppState;
use pulse_server::{app, audit};
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

/// Peer address stamped on every test request, standing in for what
/// `into_make_service_with_connect_info` provides on a live listener.
pub const TEST_PEER: &str = "127.0.0.1:45678";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
    /// Receiver half of the audit channel, for asserting on emitted entries.
    pub audit_rx: mpsc::Receiver<AuditEntry>,
}

pub fn build_test_context(hash_key: &str, private_key: Option<RsaPrivateKey>) -> TestContext {
    let temp_dir = tempfile::tempdir().unwrap();
    let storage = pulse_storage::open(
        "",
        temp_dir.path().join("snapshot.json").to_str().unwrap(),
        false,
    )
    .unwrap();

    let (audit_tx, audit_rx) = audit::channel();
    let state = AppState::new(storage, hash_key.to_string(), private_key, audit_tx);
    let app = app::build_app(state.clone());

    TestContext {
        temp_dir,
        state,
        app,
        audit_rx,
    }
}

pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let peer: SocketAddr = TEST_PEER.parse().unwrap();
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(peer));
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(Body::from(body)).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec(), headers)
}

pub async fn body_string(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, String) {
    let (status, body, _) = request(app, method, uri, &[], Vec::new()).await;
    (status, String::from_utf8_lossy(&body).to_string())
}
