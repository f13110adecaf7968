//! Client for the external face detector/embedder sidecar.
//!
//! The sidecar exposes one endpoint, `POST /embed-largest-face`, taking a
//! multipart image upload (field `file`) and answering with the embedding,
//! bounding box and detector confidence of the largest face it found.

use std::time::Duration;

use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::types::Detection;

const EMBED_PATH: &str = "/embed-largest-face";
const UPLOAD_FIELD: &str = "file";
const UPLOAD_FILENAME: &str = "upload.jpg";

/// Default bound on a single provider round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider: failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("provider: request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider: sidecar error ({status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("provider: malformed response: {0}")]
    Malformed(String),
    #[error("provider: empty embedding returned")]
    EmptyEmbedding,
    #[error("provider: dimension mismatch: declared {declared}, got {actual}")]
    DimensionMismatch { declared: usize, actual: usize },
}

/// Source of face detections and embeddings.
///
/// Implementations must be safe for concurrent use (Send + Sync).
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Detect the largest face in `image` and return its embedding.
    async fn detect(&self, image: &[u8]) -> Result<Detection, ProviderError>;
}

/// HTTP sidecar provider.
#[derive(Clone)]
pub struct SidecarProvider {
    client: Client,
    url: String,
}

impl SidecarProvider {
    /// Build a provider for `endpoint` (one trailing slash tolerated).
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self {
            client,
            url: embed_url(endpoint),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for SidecarProvider {
    async fn detect(&self, image: &[u8]) -> Result<Detection, ProviderError> {
        let form = multipart::Form::new().part(
            UPLOAD_FIELD,
            multipart::Part::bytes(image.to_vec()).file_name(UPLOAD_FILENAME),
        );

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        tracing::debug!(url = %self.url, status = status.as_u16(), bytes = body.len(), "sidecar responded");
        parse_response(status, &body)
    }
}

/// Append the embed path to `endpoint`, stripping one trailing slash.
pub fn embed_url(endpoint: &str) -> String {
    let base = endpoint.strip_suffix('/').unwrap_or(endpoint);
    format!("{base}{EMBED_PATH}")
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Turn a sidecar response into a detection or a typed provider error.
pub(crate) fn parse_response(status: StatusCode, body: &[u8]) -> Result<Detection, ProviderError> {
    if !status.is_success() {
        let detail = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|e| e.detail)
            .map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_string());
        return Err(ProviderError::Status {
            status: status.as_u16(),
            detail,
        });
    }

    serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Reject empty embeddings and embeddings whose declared dimension disagrees
/// with their length.
pub fn check_shape(detection: &Detection) -> Result<(), ProviderError> {
    if detection.embedding.is_empty() {
        return Err(ProviderError::EmptyEmbedding);
    }
    match detection.dim {
        Some(declared) if declared != 0 && declared != detection.embedding.len() => {
            Err(ProviderError::DimensionMismatch {
                declared,
                actual: detection.embedding.len(),
            })
        }
        _ => Ok(()),
    }
}
