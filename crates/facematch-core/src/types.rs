use serde::{Deserialize, Serialize};

/// Identity grouping (e.g. a content collection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub display_name: String,
    pub is_nsfw: bool,
}

/// A named identity scoped to one category, as returned by name search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub category_id: i64,
    pub category_name: String,
    pub display_name: String,
    /// Disambiguates same-named people. Empty when unused.
    pub disambiguation_tag: String,
    pub is_hidden: bool,
}

/// Upsert key for a person: (category, name, tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPerson {
    pub category_id: i64,
    pub display_name: String,
    pub disambiguation_tag: String,
}

/// An accepted face embedding, ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewFaceRecord {
    pub category_id: i64,
    pub person_id: i64,
    pub phash: u64,
    pub embedding: Vec<f32>,
}

/// Nearest-neighbor row returned by the face index.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub face_id: i64,
    pub category_id: i64,
    pub person_id: i64,
    pub display_name: String,
    pub disambiguation_tag: String,
    /// Cosine distance in [0, 2]. Lower = more similar.
    pub distance: f32,
}

/// Best match for one person in a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub face_id: i64,
    pub category_id: i64,
    pub person_id: i64,
    pub display_name: String,
    pub disambiguation_tag: String,
    /// Similarity in [0, 1]. Higher = more similar.
    pub similarity: f32,
}

/// Face bounding box in source image pixels, as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Largest-face detection as reported by the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub embedding: Vec<f64>,
    /// Declared embedding dimension. Some provider versions omit it.
    #[serde(default)]
    pub dim: Option<usize>,
    pub bbox: BoundingBox,
    /// Detector confidence. Some provider versions omit it or send null.
    /// Kept in f64 so values just under a threshold are not rounded onto it.
    #[serde(default)]
    pub det_score: Option<f64>,
}

/// Cosine distance (`1 - cosine similarity`) between two vectors.
///
/// Returns a value in [0, 2]. A zero-norm input is treated as orthogonal (1.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        1.0 - dot / denom
    } else {
        1.0
    }
}
