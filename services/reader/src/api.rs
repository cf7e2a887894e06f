use crate::config::ApiConfig;
use crate::error::ReadError;
use crate::service::{ApiRequest, ApiResponse, ReadService, Route};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReadService>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/ready", get(readiness_check))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

/// Every other path: `/<route>/<key>` goes through the read service
async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let response = match parse_request(method, uri.path()) {
        Ok(request) => state.service.handle(request).await,
        Err(e) => ApiResponse::from(e),
    };
    render(response)
}

/// Split a raw path into route and percent-decoded key.
pub fn parse_request(method: Method, path: &str) -> Result<ApiRequest, ReadError> {
    let trimmed = path.trim_start_matches('/');
    let (segment, raw_key) = match trimmed.split_once('/') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (trimmed, None),
    };

    let key = match raw_key.filter(|k| !k.is_empty()) {
        Some(raw) => Some(
            urlencoding::decode(raw)
                .map_err(|_| ReadError::InvalidRequest)?
                .into_owned(),
        ),
        None => None,
    };

    Ok(ApiRequest {
        route: Route::from_segment(segment),
        method,
        key,
    })
}

fn render(response: ApiResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(Body::from(response.body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Start the read API server, stopping when `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting read API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ThumbnailDelivery;
    use axum::http::Request;
    use pictor_storage::metadata_store::MockMetadataStore;
    use pictor_storage::testing::{InMemoryMetadataStore, InMemoryObjectStore};
    use pictor_storage::{MetadataCache, MetadataRecord, MetadataStore, StorageError};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router_with(store: Arc<dyn MetadataStore>) -> Router {
        let service = ReadService::new(
            MetadataCache::uncached(store),
            Arc::new(InMemoryObjectStore::new()),
            ThumbnailDelivery::Presigned {
                bucket: "thumbnails".to_string(),
                expiry: Duration::from_secs(300),
            },
        );
        create_router(
            AppState {
                service: Arc::new(service),
            },
            &ApiConfig::default(),
        )
    }

    fn sample_router() -> Router {
        let store = Arc::new(InMemoryMetadataStore::new());
        store.insert(MetadataRecord::processed(
            "uploads/my photo.jpg",
            "resized/my photo-800.jpg",
            1_700_000_000,
        ));
        store.insert(MetadataRecord::processed(
            "sample.jpg",
            "resized/sample-800.jpg",
            1_700_000_000,
        ));
        router_with(store)
    }

    async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Response) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let request = parse_request(Method::GET, "/meta/uploads%2Fcat%20one.png").unwrap();
        assert_eq!(request.route, Route::Meta);
        assert_eq!(request.key.as_deref(), Some("uploads/cat one.png"));

        let request = parse_request(Method::GET, "/img/a/b/c.jpg").unwrap();
        assert_eq!(request.route, Route::Img);
        assert_eq!(request.key.as_deref(), Some("a/b/c.jpg"));

        let request = parse_request(Method::GET, "/meta/").unwrap();
        assert_eq!(request.key, None);

        let request = parse_request(Method::GET, "/health").unwrap();
        assert_eq!(request.route, Route::Health);
        assert_eq!(request.key, None);

        assert!(matches!(
            parse_request(Method::GET, "/meta/%FF%FE"),
            Err(ReadError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn test_health_route() {
        let router = sample_router();
        let (status, response) = send(&router, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(body_string(response).await, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_meta_route() {
        let router = sample_router();

        let (status, response) = send(&router, "GET", "/meta/sample.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_string(response).await.contains("resized/sample-800.jpg"));

        let (status, response) = send(&router, "GET", "/meta/uploads%2Fmy%20photo.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_string(response).await.contains("resized/my photo-800.jpg"));

        let (status, _) = send(&router, "GET", "/meta/absent.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_not_allowed_route() {
        let router = sample_router();
        let (status, response) = send(&router, "POST", "/meta/sample.jpg").await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow").unwrap(), "GET, HEAD");
    }

    #[tokio::test]
    async fn test_img_head_route() {
        let router = sample_router();
        let (status, response) = send(&router, "HEAD", "/img/sample.jpg").await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_route() {
        let router = sample_router();
        let (status, response) = send(&router, "GET", "/img").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("missing key"));
    }

    #[tokio::test]
    async fn test_ready_route() {
        let router = sample_router();
        let (status, _) = send(&router, "GET", "/ready").await;
        assert_eq!(status, StatusCode::OK);

        let mut store = MockMetadataStore::new();
        store
            .expect_ping()
            .returning(|| Err(StorageError::object_store("metadata.ping", "refused")));
        let router = router_with(Arc::new(store));
        let (status, _) = send(&router, "GET", "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
