//! Pictor Reader
//!
//! HTTP read path of the Pictor image service:
//!
//! - `GET|HEAD /meta/<key>`: the metadata record of a processed source image,
//!   served cache-aside through [`pictor_storage::MetadataCache`]
//! - `GET|HEAD /img/<key>`: the thumbnail, as a CDN redirect or a presigned URL
//! - `GET /health`: liveness, no dependency checks
//! - `GET /ready`: durable store connectivity

pub mod api;
pub mod config;
pub mod error;
pub mod resolver;
pub mod service;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ReadError;
pub use service::{ApiRequest, ApiResponse, ReadService, Route, ThumbnailDelivery};
