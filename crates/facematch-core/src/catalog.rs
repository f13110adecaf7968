//! Storage seams consumed by ingestion and search.
//!
//! The core never owns a connection; callers inject an implementation
//! (see the `facematch-store` crate for the SQLite one). Uniqueness of
//! face hashes and person keys is the implementation's job.

use thiserror::Error;

use crate::types::{Candidate, Category, NewFaceRecord, NewPerson, Person};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: not found: {0}")]
    NotFound(String),
    #[error("store: constraint violated: {0}")]
    Constraint(String),
    #[error("store: embedding dimension {actual} does not match catalog dimension {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("store: {0}")]
    Backend(String),
}

/// Face records and nearest-neighbor lookup by embedding.
#[async_trait::async_trait]
pub trait FaceIndex: Send + Sync {
    /// Whether a face record with exactly this perceptual hash exists.
    async fn hash_exists(&self, phash: u64) -> Result<bool, StoreError>;

    /// Persist a face record and return its id.
    async fn insert_face(&self, record: &NewFaceRecord) -> Result<i64, StoreError>;

    /// Up to `limit` faces in `category_ids`, ordered by ascending cosine
    /// distance to `query` (ties by ascending face id). Faces of hidden
    /// people are excluded.
    async fn nearest(
        &self,
        category_ids: &[i64],
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;
}

/// Identity records.
#[async_trait::async_trait]
pub trait PeopleStore: Send + Sync {
    /// Insert or refresh the person keyed by (category, name, tag) and return its id.
    async fn upsert_person(&self, person: &NewPerson) -> Result<i64, StoreError>;

    /// People whose display name contains `query`.
    async fn search_people(&self, query: &str, limit: usize) -> Result<Vec<Person>, StoreError>;

    async fn set_hidden(&self, person_id: i64, hidden: bool) -> Result<(), StoreError>;

    /// Delete a person and all their face records. Returns the number of
    /// face records removed.
    async fn purge_person(&self, person_id: i64) -> Result<usize, StoreError>;
}

/// Category administration.
#[async_trait::async_trait]
pub trait CategoryStore: Send + Sync {
    /// All categories, ordered by display name.
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    /// Id of the category named exactly `name`.
    async fn category_id(&self, name: &str) -> Result<i64, StoreError>;

    async fn create_category(&self, name: &str, is_nsfw: bool) -> Result<i64, StoreError>;
}
