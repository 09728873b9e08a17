//! Metrics ingestion server: HTTP (axum) and gRPC (tonic) fronts over a
//! pluggable storage engine, with HMAC request integrity, optional RSA
//! envelope decryption, and an audit trail for batch ingests.

pub mod app;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod state;
