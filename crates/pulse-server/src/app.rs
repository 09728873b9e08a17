use crate::state::AppState;
use crate::{handlers, middleware as mw};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;

/// Builds the HTTP app: routes plus the middleware chain. Outer to inner:
/// request logging, envelope decryption, HMAC verification, response
/// signing, response compression.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::main_page))
        .route("/ping", get(handlers::ping))
        .route("/value/{kind}/{name}", get(handlers::get_metric_plain))
        .route("/value/", post(handlers::read_metric_json))
        .route(
            "/update/{kind}/{name}/{value}",
            post(handlers::update_metric_path),
        )
        .route("/update/", post(handlers::update_metric_json))
        .route("/updates/", post(handlers::update_batch_json))
        .layer(CompressionLayer::new())
        .layer(from_fn_with_state(state.clone(), mw::sign_response))
        .layer(from_fn_with_state(state.clone(), mw::verify_hash))
        .layer(from_fn_with_state(state.clone(), mw::decrypt_body))
        .layer(from_fn(mw::request_logging))
        .with_state(state)
}
