//! Acceptance checks applied to a detected face before its embedding is trusted.
//!
//! Three checks, in order: detector confidence, face height, and sharpness
//! (variance of the discrete Laplacian over the face crop).

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Detection;

// --- Default thresholds ---
const DEFAULT_MIN_DET_SCORE: f64 = 0.5;
const DEFAULT_MIN_FACE_HEIGHT: f64 = 92.0;
const DEFAULT_MIN_CROP_SIDE: u32 = 8;
const DEFAULT_MIN_SHARPNESS: f64 = 20.0;

/// Tunable quality bar. Trades ingestion recall for match precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum detector confidence (inclusive).
    pub min_det_score: f64,
    /// Reject detections whose provider did not report a confidence.
    pub require_det_score: bool,
    /// Minimum bounding-box height in pixels (inclusive).
    pub min_face_height: f64,
    /// Minimum clamped crop width and height in pixels.
    pub min_crop_side: u32,
    /// Minimum Laplacian variance over the crop (inclusive).
    pub min_sharpness: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_det_score: DEFAULT_MIN_DET_SCORE,
            require_det_score: false,
            min_face_height: DEFAULT_MIN_FACE_HEIGHT,
            min_crop_side: DEFAULT_MIN_CROP_SIDE,
            min_sharpness: DEFAULT_MIN_SHARPNESS,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityRejection {
    #[error("detection confidence {score} is below {min}")]
    LowConfidence { score: f64, min: f64 },
    #[error("provider reported no detection confidence")]
    MissingConfidence,
    #[error("face height {height}px is below {min}px")]
    FaceTooSmall { height: f64, min: f64 },
    #[error("face crop {width}x{height} is too small to assess (minimum {min}x{min})")]
    CropTooSmall { width: u32, height: u32, min: u32 },
    #[error("face crop is too blurry: laplacian variance {variance:.2} is below {min:.2}")]
    Blurry { variance: f64, min: f64 },
    #[error("image could not be decoded: {0}")]
    Undecodable(String),
}

/// Measurements taken while accepting a detection.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub det_score: Option<f64>,
    pub face_height: f64,
    pub crop_width: u32,
    pub crop_height: u32,
    pub sharpness: f64,
}

/// Decode image bytes for [`assess`].
pub fn decode(image_bytes: &[u8]) -> Result<DynamicImage, QualityRejection> {
    image::load_from_memory(image_bytes).map_err(|e| QualityRejection::Undecodable(e.to_string()))
}

/// Run every quality check against `detection` and the decoded source image.
///
/// CPU-bound; async callers run it on the blocking pool.
pub fn assess(
    detection: &Detection,
    image: &DynamicImage,
    thresholds: &QualityThresholds,
) -> Result<QualityReport, QualityRejection> {
    match detection.det_score {
        Some(score) if score < thresholds.min_det_score => {
            return Err(QualityRejection::LowConfidence {
                score,
                min: thresholds.min_det_score,
            });
        }
        Some(_) => {}
        None if thresholds.require_det_score => return Err(QualityRejection::MissingConfidence),
        None => tracing::warn!("provider omitted det_score; skipping confidence check"),
    }

    let face_height = detection.bbox.height();
    // Negated comparison so a NaN height is rejected too.
    if !(face_height >= thresholds.min_face_height) {
        return Err(QualityRejection::FaceTooSmall {
            height: face_height,
            min: thresholds.min_face_height,
        });
    }

    let rgb = image.to_rgb8();
    let (img_w, img_h) = rgb.dimensions();

    let crop = CropRect::clamped(detection, img_w, img_h);
    if crop.width() < thresholds.min_crop_side || crop.height() < thresholds.min_crop_side {
        return Err(QualityRejection::CropTooSmall {
            width: crop.width(),
            height: crop.height(),
            min: thresholds.min_crop_side,
        });
    }

    let mut gray = Vec::with_capacity((crop.width() * crop.height()) as usize);
    for y in crop.y1..crop.y2 {
        for x in crop.x1..crop.x2 {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            gray.push(luma8(r, g, b));
        }
    }

    let sharpness = laplacian_variance(&gray, crop.width() as usize, crop.height() as usize);
    if !(sharpness >= thresholds.min_sharpness) {
        return Err(QualityRejection::Blurry {
            variance: sharpness,
            min: thresholds.min_sharpness,
        });
    }

    Ok(QualityReport {
        det_score: detection.det_score,
        face_height,
        crop_width: crop.width(),
        crop_height: crop.height(),
        sharpness,
    })
}

/// Integer luma with broadcast weights: `(299R + 587G + 114B) / 1000`, rounded.
pub fn luma8(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Variance of the 4-neighbor discrete Laplacian over the interior of a
/// row-major grayscale buffer (1-pixel border excluded).
///
/// Returns 0.0 when the buffer has no interior.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 || gray.len() < width * height {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..height - 1 {
        let row = y * width;
        for x in 1..width - 1 {
            let c = gray[row + x] as f64;
            let l = gray[row + x - 1] as f64;
            let r = gray[row + x + 1] as f64;
            let u = gray[row - width + x] as f64;
            let d = gray[row + width + x] as f64;
            let lap = -4.0 * c + l + r + u + d;
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = ((width - 2) * (height - 2)) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Bounding box snapped outward to whole pixels and clamped to the image.
struct CropRect {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl CropRect {
    fn clamped(detection: &Detection, img_w: u32, img_h: u32) -> Self {
        let b = &detection.bbox;
        // `as` saturates, and maps NaN to 0.
        let clamp = |v: f64, max: u32| -> u32 { (v.max(0.0) as u32).min(max) };
        let x1 = clamp(b.x1.floor(), img_w);
        let y1 = clamp(b.y1.floor(), img_h);
        let x2 = clamp(b.x2.ceil(), img_w).max(x1);
        let y2 = clamp(b.y2.ceil(), img_h).max(y1);
        Self { x1, y1, x2, y2 }
    }

    fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}
