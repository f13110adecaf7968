//! HTTP API.
//!
//! - GET  /api/categories - category list JSON
//! - POST /api/search     - multipart `categories[]` ids + `image` file
//! - GET  /api/status     - version and provider configuration
//! - GET  /*              - static web assets, when the directory exists

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use facematch_core::catalog::{CategoryStore, StoreError};
use facematch_core::gate::GateError;
use facematch_core::search::{SearchError, SimilaritySearch};
use facematch_core::types::{Category, SearchResult};
use facematch_core::SidecarProvider;
use facematch_store::SqliteCatalog;

/// Upper bound on a search request body.
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub type Search = SimilaritySearch<SidecarProvider, SqliteCatalog>;

#[derive(Clone)]
pub struct AppState {
    catalog: SqliteCatalog,
    /// `None` when no embedding endpoint is configured.
    search: Option<Arc<Search>>,
}

impl AppState {
    pub fn new(catalog: SqliteCatalog, search: Option<Search>) -> Self {
        Self {
            catalog,
            search: search.map(Arc::new),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Config(String),
    #[error("invalid multipart body: {}", .0.body_text())]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 413 once the body limit is hit, 400 for malformed input.
            ApiError::Multipart(e) => e.status(),
            ApiError::Search(SearchError::Gate(GateError::Quality(_))) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Search(SearchError::Gate(GateError::Provider(_))) => StatusCode::BAD_GATEWAY,
            ApiError::Search(SearchError::Gate(GateError::Config(_) | GateError::Worker(_))) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Search(SearchError::Storage(_)) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::info!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct Status {
    version: &'static str,
    embedding_configured: bool,
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(addr: &str, state: AppState, static_dir: Option<PathBuf>) -> Result<()> {
    let app = router(state, static_dir);

    let addr = parse_addr(addr)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "facematchd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let mut app = Router::new()
        .route("/api/categories", get(list_categories))
        .route("/api/search", post(search))
        .route("/api/status", get(status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    if let Some(dir) = static_dir {
        if dir.is_dir() {
            tracing::info!(dir = %dir.display(), "serving static assets");
            app = app.fallback_service(ServeDir::new(dir));
        } else {
            tracing::warn!(dir = %dir.display(), "static dir not found, UI disabled");
        }
    }

    app.layer(TraceLayer::new_for_http())
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.catalog.list_categories().await?))
}

async fn search(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let mut category_ids = Vec::new();
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "categories[]" => {
                let value = field.text().await?;
                match value.trim().parse::<i64>() {
                    Ok(id) => category_ids.push(id),
                    Err(_) => tracing::debug!(value = %value, "ignoring unparsable category id"),
                }
            }
            "image" => {
                image = Some(field.bytes().await?.to_vec());
            }
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("image is required".into()))?;
    if category_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let search = state
        .search
        .as_ref()
        .ok_or_else(|| ApiError::Config("embedding endpoint is not configured".into()))?;

    Ok(Json(search.search(&category_ids, &image).await?))
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: env!("CARGO_PKG_VERSION"),
        embedding_configured: state.search.is_some(),
    })
}

/// Parse a listen address; a bare ":port" binds all interfaces.
fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    addr.parse()
        .with_context(|| format!("invalid listen address {addr:?}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("facematchd shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use facematch_core::provider::ProviderError;
    use facematch_core::quality::QualityRejection;
    use facematch_core::{EmbeddingGate, FaceIndex, NewFaceRecord, NewPerson, PeopleStore, QualityThresholds};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facematch-test-boundary";

    /// Encode `(field, filename, data)` parts as a multipart/form-data body.
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            let disposition = match file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                ),
                None => format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn search_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/search")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn app_without_provider() -> Router {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        router(AppState::new(catalog, None), None)
    }

    /// Fine checkerboard PNG, sharp enough to pass the default quality gate.
    fn sharp_png() -> Vec<u8> {
        let buf = image::ImageBuffer::from_fn(200, 200, |x, y| {
            if (x + y) % 2 == 0 { image::Rgb([230u8, 220, 210]) } else { image::Rgb([20, 30, 40]) }
        });
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_search_requires_image() {
        let app = app_without_provider().await;

        let missing = multipart_body(&[("categories[]", None, b"1")]);
        let response = app.clone().oneshot(search_request(missing)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "image is required");

        let empty = multipart_body(&[("categories[]", None, b"1"), ("image", Some("q.jpg"), b"")]);
        let response = app.oneshot(search_request(empty)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_with_no_usable_category_returns_empty_list() {
        // No provider is configured: the request must not need one.
        let app = app_without_provider().await;
        let body = multipart_body(&[
            ("categories[]", None, b"idols"),
            ("categories[]", None, b""),
            ("image", Some("q.jpg"), b"jpeg bytes"),
        ]);

        let response = app.oneshot(search_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_search_rejects_oversized_body() {
        let app = app_without_provider().await;
        let image = vec![0u8; MAX_UPLOAD_BYTES + 1024];
        let body = multipart_body(&[("categories[]", None, b"1"), ("image", Some("q.jpg"), &image)]);

        let response = app.oneshot(search_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_search_without_provider_is_server_error() {
        let app = app_without_provider().await;
        let body = multipart_body(&[("categories[]", None, b"1"), ("image", Some("q.jpg"), b"jpeg bytes")]);

        let response = app.oneshot(search_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_search_skips_unparsable_category_ids() {
        let sidecar = Router::new().route(
            "/embed-largest-face",
            post(|| async {
                Json(serde_json::json!({
                    "embedding": [0.6, 0.8],
                    "dim": 2,
                    "bbox": [0, 0, 120, 120],
                    "det_score": 0.9
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, sidecar).await.unwrap() });

        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let category_id = catalog.create_category("idols", false).await.unwrap();
        let person_id = catalog
            .upsert_person(&NewPerson {
                category_id,
                display_name: "Kim Minji".into(),
                disambiguation_tag: "nj".into(),
            })
            .await
            .unwrap();
        catalog
            .insert_face(&NewFaceRecord {
                category_id,
                person_id,
                phash: 0x0123_4567_89ab_cdef,
                embedding: vec![0.6, 0.8],
            })
            .await
            .unwrap();

        let gate = EmbeddingGate::connect(&format!("http://{addr}"), Duration::from_secs(5), QualityThresholds::default())
            .unwrap();
        let search = SimilaritySearch::new(gate, catalog.clone());
        let app = router(AppState::new(catalog, Some(search)), None);

        let id = category_id.to_string();
        let image = sharp_png();
        let body = multipart_body(&[
            ("categories[]", None, b"idols"),
            ("categories[]", None, id.as_bytes()),
            ("image", Some("q.png"), &image),
        ]);
        let response = app.oneshot(search_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let results = json_body(response).await;
        let results = results.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["display_name"], "Kim Minji");
        assert_eq!(results[0]["category_id"], category_id);
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr(":8080").unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(parse_addr("127.0.0.1:3000").unwrap(), "127.0.0.1:3000".parse().unwrap());
        assert!(parse_addr("localhost").is_err());
    }

    #[test]
    fn test_status_mapping() {
        let quality = ApiError::from(SearchError::Gate(GateError::Quality(QualityRejection::MissingConfidence)));
        assert_eq!(quality.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let provider = ApiError::from(SearchError::Gate(GateError::Provider(ProviderError::EmptyEmbedding)));
        assert_eq!(provider.status(), StatusCode::BAD_GATEWAY);

        let config = ApiError::from(SearchError::Gate(GateError::Config("empty image".into())));
        assert_eq!(config.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let storage = ApiError::from(StoreError::Backend("disk I/O error".into()));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::BadRequest("image is required".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_body_carries_reason() {
        let rejection = QualityRejection::FaceTooSmall { height: 50.0, min: 92.0 };
        let response = ApiError::from(SearchError::Gate(GateError::Quality(rejection))).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let message = json["error"].as_str().unwrap();
        assert!(message.contains("face height"), "got {message}");
    }

    #[tokio::test]
    async fn test_router_builds_without_static_dir() {
        let catalog = SqliteCatalog::open_in_memory().await.unwrap();
        let _app = router(AppState::new(catalog, None), Some(PathBuf::from("/nonexistent/static")));
    }
}
