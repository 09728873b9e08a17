//! Shared building blocks for the pulse agent and server: the metric model,
//! the gzip/HMAC transport helpers, and the generated gRPC types.

pub mod compress;
pub mod signing;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("pulse");
}
