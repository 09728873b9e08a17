use crate::middleware::error_response;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use chrono::Utc;
use pulse_common::compress;
use pulse_common::types::{AuditEntry, Metric, MetricKind, MetricProbe};
use pulse_storage::StorageError;
use std::fmt::Write;
use std::net::SocketAddr;

/// GET `/` — every stored metric rendered as an HTML table.
pub async fn main_page(State(state): State<AppState>) -> Response {
    let all = match state.storage.get_metrics().await {
        Ok(all) => all,
        Err(e) => {
            tracing::error!(error = %e, "unable to list metrics");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    let mut rows = String::new();
    for (id, value) in &all {
        let _ = write!(rows, "<tr><td>{id}</td><td>{value}</td></tr>");
    }
    Html(format!(
        "<!DOCTYPE html><html><head><title>pulse metrics</title></head>\
         <body><h1>Current metrics</h1><table>{rows}</table></body></html>"
    ))
    .into_response()
}

/// GET `/ping` — storage backend liveness.
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, "database is accessible\n").into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// GET `/value/{kind}/{name}` — the bare stored value as plain text.
/// The lookup is by name alone; the kind segment routes but is not
/// validated here.
pub async fn get_metric_plain(
    State(state): State<AppState>,
    Path((_kind, name)): Path<(String, String)>,
) -> Response {
    match state.storage.get_metric(&name).await {
        Ok(Some(metric)) => (StatusCode::OK, metric.format_value()).into_response(),
        Ok(None) | Err(_) => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// POST `/value/` — JSON probe, echoes the full stored metric.
pub async fn read_metric_json(State(state): State<AppState>, body: Bytes) -> Response {
    let probe: MetricProbe = match serde_json::from_slice(&body) {
        Ok(probe) => probe,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match state.storage.get_metric(&probe.id).await {
        Ok(Some(metric)) => Json(metric).into_response(),
        Ok(None) | Err(_) => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// POST `/update/{kind}/{name}/{value}` — path-encoded single update.
pub async fn update_metric_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let Ok(kind) = kind.parse::<MetricKind>() else {
        return error_response(StatusCode::BAD_REQUEST, "bad request");
    };

    let metric = match kind {
        MetricKind::Counter => match value.parse::<i64>() {
            Ok(delta) => Metric::counter(name.clone(), delta),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "bad request"),
        },
        MetricKind::Gauge => match value.parse::<f64>() {
            Ok(v) => Metric::gauge(name.clone(), v),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "bad request"),
        },
    };

    match state.storage.update_metric(metric).await {
        Ok(stored) => (
            StatusCode::OK,
            format!(
                "accepted metric: (type: {kind}, name: {name}, value: {})\n",
                stored.format_value()
            ),
        )
            .into_response(),
        Err(e) => storage_error_response(&e),
    }
}

/// POST `/update/` — JSON single update, echoes the stored canonical form.
pub async fn update_metric_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match decode_body(&headers, &body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let metric: Metric = match serde_json::from_slice(&body) {
        Ok(metric) => metric,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    match state.storage.update_metric(metric).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => storage_error_response(&e),
    }
}

/// POST `/updates/` — JSON batch update; emits one audit entry per call.
pub async fn update_batch_json(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match decode_body(&headers, &body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let metrics: Vec<Metric> = match serde_json::from_slice(&body) {
        Ok(metrics) => metrics,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    // The agent stamps every request with its outbound address; requests
    // without the header are attributed to the socket peer.
    let source_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string());

    let entry = AuditEntry {
        ts: Utc::now().timestamp(),
        metric_names: metrics.iter().map(|m| m.id.clone()).collect(),
        source_ip,
    };
    // Blocks when the audit channel is at capacity; back-pressure on the
    // batch path is acceptable.
    if state.audit.send(entry).await.is_err() {
        tracing::warn!("audit pipeline is closed, entry dropped");
    }

    match state.storage.update_batch(metrics).await {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "batch update failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

/// Handlers receive the body after the decrypt/verify middleware; gzip
/// content is decompressed here, mirroring the transport the agent uses.
fn decode_body(headers: &HeaderMap, body: &Bytes) -> Result<Vec<u8>, Response> {
    let is_gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        return Ok(body.to_vec());
    }
    compress::gunzip(body).map_err(|e| {
        tracing::warn!(error = %e, "unable to decompress request body");
        error_response(StatusCode::BAD_REQUEST, "unable to decompress body")
    })
}

fn storage_error_response(e: &StorageError) -> Response {
    match e {
        StorageError::KindMismatch { .. } => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        _ => {
            tracing::error!(error = %e, "storage failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}
