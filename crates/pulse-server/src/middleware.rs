//! Request middleware chain: logging, envelope decryption, HMAC
//! verification, and response signing. Bodies are buffered and rebuilt so
//! inner layers and handlers see plain bytes.

use crate::state::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pulse_common::signing;
use std::time::Instant;

/// Logs uri, method, status, duration and response size for every request.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let (parts, body) = response.into_parts();
    let body_bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();

    tracing::info!(
        uri = %uri,
        method = %method,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        response_size = body_bytes.len(),
        "request handled"
    );

    Response::from_parts(parts, Body::from(body_bytes))
}

/// Decrypts the request body with the configured private key.
///
/// Runs before HMAC verification: the agent signs the compressed bytes
/// prior to encryption, so the verifier must see the decrypted body to
/// reproduce the digest.
pub async fn decrypt_body(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(private_key) = state.private_key.clone() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body")
        }
    };

    if body_bytes.is_empty() {
        let req = Request::from_parts(parts, Body::from(body_bytes));
        return next.run(req).await;
    }

    match crate::crypto::decrypt(&body_bytes, &private_key) {
        Ok(plain) => {
            let req = Request::from_parts(parts, Body::from(plain));
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "unable to decrypt request body");
            error_response(StatusCode::BAD_REQUEST, "unable to decrypt request body")
        }
    }
}

/// Verifies the `Hash` header against HMAC-SHA256 of the body. Pass-through
/// when no key is configured, the header is absent, or it carries the
/// literal `none`.
pub async fn verify_hash(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let received = req
        .headers()
        .get("Hash")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if state.hash_key.is_empty() || received.is_empty() || received == "none" {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body")
        }
    };

    if !signing::verify(&state.hash_key, &body_bytes, &received) {
        tracing::warn!("request hash mismatch");
        return error_response(StatusCode::BAD_REQUEST, "invalid body hash");
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    next.run(req).await
}

/// Adds a `Hashsha256` response header carrying HMAC-SHA256 of the
/// *request* body — a historical observable this server preserves.
pub async fn sign_response(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.hash_key.is_empty() {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body")
        }
    };
    let digest = signing::sign(&state.hash_key, &body_bytes);

    let req = Request::from_parts(parts, Body::from(body_bytes));
    let mut response = next.run(req).await;
    if let Ok(value) = digest.parse() {
        response.headers_mut().insert("Hashsha256", value);
    }
    response
}

pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, format!("{message}\n")).into_response()
}
