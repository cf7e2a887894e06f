//! Transport-independent request handling for the read endpoints.

use crate::config::Config;
use crate::error::ReadError;
use crate::resolver::resolve_thumbnail_key;
use axum::http::{Method, StatusCode};
use pictor_storage::{MetadataCache, ObjectStore, StorageResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Methods accepted by the keyed endpoints
pub const ALLOWED_METHODS: &str = "GET, HEAD";

/// First path segment of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Health,
    Meta,
    Img,
    Unknown,
}

impl Route {
    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "health" => Self::Health,
            "meta" => Self::Meta,
            "img" => Self::Img,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Meta => "meta",
            Self::Img => "img",
            Self::Unknown => "unknown",
        }
    }
}

/// One inbound request, already split by the transport adapter.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub route: Route,
    pub method: Method,
    /// Decoded source key, `None` when the path carried none
    pub key: Option<String>,
}

impl ApiRequest {
    pub fn new(route: Route, method: Method, key: Option<&str>) -> Self {
        Self {
            route,
            method,
            key: key.map(str::to_string),
        }
    }
}

/// Status, headers and body of a response. JSON bodies always carry
/// `Content-Type: application/json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn json(status: StatusCode, body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn without_body(mut self) -> Self {
        self.body.clear();
        self
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<ReadError> for ApiResponse {
    fn from(err: ReadError) -> Self {
        let body = serde_json::json!(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        });
        let response = ApiResponse::json(err.status(), body.to_string());

        match err {
            ReadError::MethodNotAllowed => response.with_header("Allow", ALLOWED_METHODS),
            _ => response,
        }
    }
}

/// How image requests hand out a thumbnail. Exactly one strategy is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailDelivery {
    /// 302 to `https://<domain>/<thumbnail key>`; a missing domain fails each request
    CdnRedirect { domain: Option<String> },
    /// 200 with a presigned object-store URL
    Presigned { bucket: String, expiry: Duration },
}

impl ThumbnailDelivery {
    pub fn from_config(config: &Config) -> Self {
        if config.delivery.cdn_redirect {
            Self::CdnRedirect {
                domain: config.delivery.cdn_domain().map(str::to_string),
            }
        } else {
            Self::Presigned {
                bucket: config.s3.bucket.clone(),
                expiry: config.presign_expiry(),
            }
        }
    }
}

/// CDN URL for a thumbnail key. Path segments are percent-encoded so the result is
/// always a valid `Location` header.
pub fn cdn_url(domain: &str, thumbnail_key: &str) -> String {
    let path = thumbnail_key
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("https://{}/{}", domain.trim_end_matches('/'), path)
}

/// Read endpoints over the metadata cache and object store
#[derive(Clone)]
pub struct ReadService {
    metadata: MetadataCache,
    objects: Arc<dyn ObjectStore>,
    delivery: ThumbnailDelivery,
}

impl ReadService {
    pub fn new(
        metadata: MetadataCache,
        objects: Arc<dyn ObjectStore>,
        delivery: ThumbnailDelivery,
    ) -> Self {
        Self {
            metadata,
            objects,
            delivery,
        }
    }

    /// Durable-store connectivity
    pub async fn ready(&self) -> StorageResult<()> {
        self.metadata.store().ping().await
    }

    /// Handle one request. Never fails: every error becomes a response.
    #[instrument(skip(self, request), fields(route = request.route.as_str(), method = %request.method))]
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let route = request.route;
        let response = self.dispatch(request).await;

        debug!(status = response.status.as_u16(), "Request handled");
        metrics::counter!(
            "pictor.reader.requests",
            "route" => route.as_str(),
            "status" => response.status.as_u16().to_string()
        )
        .increment(1);

        response
    }

    async fn dispatch(&self, request: ApiRequest) -> ApiResponse {
        if request.route == Route::Health && request.method == Method::GET {
            return ApiResponse::json(StatusCode::OK, serde_json::json!({ "ok": true }).to_string());
        }

        let key = match request.key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => return ReadError::MissingKey.into(),
        };

        let head = request.method == Method::HEAD;
        let result = match request.route {
            Route::Meta => self.metadata_lookup(key, &request.method).await,
            Route::Img => self.image_access(key, &request.method).await,
            Route::Health | Route::Unknown => Err(ReadError::NotFound),
        };

        let response = result.unwrap_or_else(|err| {
            if let ReadError::Upstream(source) = &err {
                error!(operation = source.operation(), error = %source, "Upstream call failed");
            }
            if let ReadError::Encode(source) = &err {
                error!(error = %source, "Response encoding failed");
            }
            err.into()
        });

        if head {
            response.without_body()
        } else {
            response
        }
    }

    /// `/meta/<key>`: the full record as JSON
    async fn metadata_lookup(&self, key: &str, method: &Method) -> Result<ApiResponse, ReadError> {
        if method != Method::GET && method != Method::HEAD {
            return Err(ReadError::MethodNotAllowed);
        }

        let record = self
            .metadata
            .get_metadata(key)
            .await?
            .ok_or(ReadError::NotFound)?;

        Ok(ApiResponse::json(StatusCode::OK, record.to_json()?))
    }

    /// `/img/<key>`: CDN redirect or presigned URL for the thumbnail
    async fn image_access(&self, key: &str, method: &Method) -> Result<ApiResponse, ReadError> {
        if method != Method::GET && method != Method::HEAD {
            return Err(ReadError::MethodNotAllowed);
        }

        let thumbnail_key = resolve_thumbnail_key(&self.metadata, key)
            .await?
            .ok_or(ReadError::NotFound)?;

        let response = match &self.delivery {
            ThumbnailDelivery::CdnRedirect { domain } => {
                let domain = domain.as_deref().ok_or(ReadError::CdnNotConfigured)?;
                ApiResponse::json(StatusCode::FOUND, String::new())
                    .with_header("Location", cdn_url(domain, &thumbnail_key))
            }
            ThumbnailDelivery::Presigned { bucket, expiry } => {
                let url = self.objects.presign(bucket, &thumbnail_key, *expiry).await?;
                ApiResponse::json(StatusCode::OK, serde_json::json!({ "url": url }).to_string())
            }
        };

        if method == Method::HEAD && response.status == StatusCode::OK {
            return Ok(ApiResponse {
                status: StatusCode::NO_CONTENT,
                ..response
            });
        }

        Ok(response)
    }
}
