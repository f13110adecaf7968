//! Embedding gate: fetch an embedding from the provider and only hand it out
//! once the detected face has passed every quality check.

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::task::JoinError;

use crate::provider::{self, EmbeddingProvider, ProviderError, SidecarProvider};
use crate::quality::{self, QualityRejection, QualityThresholds};

#[derive(Error, Debug)]
pub enum GateError {
    #[error("configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("quality rejection: {0}")]
    Quality(#[from] QualityRejection),
    #[error("image worker: {0}")]
    Worker(#[from] JoinError),
}

impl GateError {
    pub fn is_quality_rejection(&self) -> bool {
        matches!(self, GateError::Quality(_))
    }
}

/// Quality-checked access to an embedding provider.
#[derive(Clone)]
pub struct EmbeddingGate<P> {
    provider: P,
    thresholds: QualityThresholds,
}

impl EmbeddingGate<SidecarProvider> {
    /// Build a gate backed by the HTTP sidecar at `endpoint`.
    pub fn connect(
        endpoint: &str,
        timeout: Duration,
        thresholds: QualityThresholds,
    ) -> Result<Self, GateError> {
        if endpoint.trim().is_empty() {
            return Err(GateError::Config("embedding endpoint is required".into()));
        }
        let provider = SidecarProvider::new(endpoint, timeout)?;
        tracing::info!(url = provider.url(), timeout_secs = timeout.as_secs(), "embedding gate configured");
        Ok(Self::new(provider, thresholds))
    }
}

impl<P: EmbeddingProvider> EmbeddingGate<P> {
    pub fn new(provider: P, thresholds: QualityThresholds) -> Self {
        Self {
            provider,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Return the face embedding for `image`, or the reason it was refused.
    pub async fn fetch_validated_embedding(&self, image: &[u8]) -> Result<Vec<f32>, GateError> {
        if image.is_empty() {
            return Err(GateError::Config("empty image".into()));
        }
        let bytes = image.to_vec();
        let decoded = run_blocking(move || quality::decode(&bytes)).await??;
        self.fetch_validated_embedding_decoded(image, Arc::new(decoded)).await
    }

    /// As [`Self::fetch_validated_embedding`], for callers that already
    /// decoded `image` into `decoded`.
    pub async fn fetch_validated_embedding_decoded(
        &self,
        image: &[u8],
        decoded: Arc<DynamicImage>,
    ) -> Result<Vec<f32>, GateError> {
        if image.is_empty() {
            return Err(GateError::Config("empty image".into()));
        }

        let detection = self.provider.detect(image).await?;
        provider::check_shape(&detection)?;

        let thresholds = self.thresholds.clone();
        let (detection, assessed) = run_blocking(move || {
            let assessed = quality::assess(&detection, &decoded, &thresholds);
            (detection, assessed)
        })
        .await?;

        let report = match assessed {
            Ok(report) => report,
            Err(rejection) => {
                tracing::info!(
                    reason = %rejection,
                    det_score = ?detection.det_score,
                    face_height = detection.bbox.height(),
                    "face rejected"
                );
                return Err(rejection.into());
            }
        };

        tracing::debug!(
            det_score = ?report.det_score,
            face_height = report.face_height,
            crop = %format!("{}x{}", report.crop_width, report.crop_height),
            sharpness = report.sharpness,
            dim = detection.embedding.len(),
            "face accepted"
        );

        Ok(detection.embedding.iter().map(|&v| v as f32).collect())
    }
}

/// Run CPU-bound image work on the blocking pool. A panic in `f` is
/// re-raised in the caller.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::tests::{detection, flat_png, sharp_image, sharp_png};
    use crate::testing::FakeProvider;

    #[tokio::test]
    async fn test_gate_returns_f32_embedding() {
        let gate = EmbeddingGate::new(
            FakeProvider::ok(detection(Some(0.9), [0.0, 0.0, 120.0, 120.0])),
            QualityThresholds::default(),
        );
        let embedding = gate.fetch_validated_embedding(&sharp_png(200, 200)).await.unwrap();
        assert_eq!(embedding, vec![0.6f32, 0.8f32]);
    }

    #[tokio::test]
    async fn test_gate_rejects_empty_image_before_provider_call() {
        let provider = FakeProvider::ok(detection(Some(0.9), [0.0, 0.0, 120.0, 120.0]));
        let calls = provider.calls();
        let gate = EmbeddingGate::new(provider, QualityThresholds::default());
        assert!(matches!(gate.fetch_validated_embedding(&[]).await, Err(GateError::Config(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_rejects_undecodable_image_before_provider_call() {
        let provider = FakeProvider::ok(detection(Some(0.9), [0.0, 0.0, 120.0, 120.0]));
        let calls = provider.calls();
        let gate = EmbeddingGate::new(provider, QualityThresholds::default());
        assert!(matches!(
            gate.fetch_validated_embedding(b"not an image").await,
            Err(GateError::Quality(QualityRejection::Undecodable(_)))
        ));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_accepts_predecoded_image() {
        let gate = EmbeddingGate::new(
            FakeProvider::ok(detection(Some(0.9), [0.0, 0.0, 120.0, 120.0])),
            QualityThresholds::default(),
        );
        // Bytes go to the provider; checks run on the decoded copy.
        let embedding = gate
            .fetch_validated_embedding_decoded(b"opaque upload", Arc::new(sharp_image(200, 200)))
            .await
            .unwrap();
        assert_eq!(embedding.len(), 2);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        assert_eq!(run_blocking(|| 6 * 7).await.unwrap(), 42);
    }

    #[test]
    fn test_connect_requires_endpoint() {
        assert!(matches!(
            EmbeddingGate::connect("", Duration::from_secs(1), QualityThresholds::default()),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            EmbeddingGate::connect("   ", Duration::from_secs(1), QualityThresholds::default()),
            Err(GateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_gate_surfaces_provider_error() {
        let gate = EmbeddingGate::new(
            FakeProvider::err(|| ProviderError::Status { status: 422, detail: "No face detected".into() }),
            QualityThresholds::default(),
        );
        let err = gate.fetch_validated_embedding(&sharp_png(50, 50)).await.unwrap_err();
        assert!(matches!(err, GateError::Provider(ProviderError::Status { status: 422, .. })));
        assert!(err.to_string().contains("No face detected"));
    }

    #[tokio::test]
    async fn test_gate_checks_shape_before_quality() {
        let mut det = detection(Some(0.1), [0.0, 0.0, 120.0, 120.0]);
        det.dim = Some(512);
        let gate = EmbeddingGate::new(FakeProvider::ok(det), QualityThresholds::default());
        assert!(matches!(
            gate.fetch_validated_embedding(&sharp_png(200, 200)).await,
            Err(GateError::Provider(ProviderError::DimensionMismatch { declared: 512, actual: 2 }))
        ));
    }

    #[tokio::test]
    async fn test_gate_rejection_reasons_stay_distinct() {
        let t = QualityThresholds::default();
        let cases = [
            (detection(Some(0.3), [0.0, 0.0, 120.0, 120.0]), sharp_png(200, 200)),
            (detection(Some(0.9), [0.0, 0.0, 120.0, 50.0]), sharp_png(200, 200)),
            (detection(Some(0.9), [0.0, 0.0, 120.0, 120.0]), flat_png(200, 200)),
        ];
        let mut reasons = Vec::new();
        for (det, img) in cases {
            let gate = EmbeddingGate::new(FakeProvider::ok(det), t.clone());
            match gate.fetch_validated_embedding(&img).await {
                Err(GateError::Quality(r)) => reasons.push(r),
                other => panic!("expected quality rejection, got {other:?}"),
            }
        }
        assert!(matches!(reasons[0], QualityRejection::LowConfidence { .. }));
        assert!(matches!(reasons[1], QualityRejection::FaceTooSmall { .. }));
        assert!(matches!(reasons[2], QualityRejection::Blurry { .. }));
    }

    #[tokio::test]
    async fn test_gate_uses_configured_thresholds() {
        let t = QualityThresholds { min_face_height: 40.0, ..Default::default() };
        let gate = EmbeddingGate::new(FakeProvider::ok(detection(Some(0.9), [0.0, 0.0, 60.0, 50.0])), t);
        assert!(gate.fetch_validated_embedding(&sharp_png(100, 100)).await.is_ok());
    }
}
