//! Similarity search: embed a query face, pull nearest neighbors from the
//! face index, and reduce them to one ranked result per person.

use std::cmp::Ordering;
use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::{FaceIndex, StoreError};
use crate::gate::{EmbeddingGate, GateError};
use crate::provider::EmbeddingProvider;
use crate::types::{Candidate, SearchResult};

/// Nearest-neighbor rows requested per search.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search: {0}")]
    Gate(#[from] GateError),
    #[error("search: {0}")]
    Storage(#[from] StoreError),
}

pub struct SimilaritySearch<P, I> {
    gate: EmbeddingGate<P>,
    index: I,
    candidate_limit: usize,
}

impl<P: EmbeddingProvider, I: FaceIndex> SimilaritySearch<P, I> {
    pub fn new(gate: EmbeddingGate<P>, index: I) -> Self {
        Self {
            gate,
            index,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    /// Best match per person among faces in `category_ids`, most similar first.
    pub async fn search(
        &self,
        category_ids: &[i64],
        image: &[u8],
    ) -> Result<Vec<SearchResult>, SearchError> {
        if category_ids.is_empty() {
            tracing::debug!("search: no categories selected");
            return Ok(Vec::new());
        }

        let embedding = self.gate.fetch_validated_embedding(image).await?;
        let candidates = self
            .index
            .nearest(category_ids, &embedding, self.candidate_limit)
            .await?;

        let results = aggregate(&candidates);
        tracing::info!(
            categories = ?category_ids,
            candidates = candidates.len(),
            people = results.len(),
            best = results.first().map(|r| r.similarity),
            "search complete"
        );
        Ok(results)
    }
}

/// Map a cosine distance in [0, 2] to a similarity in [0, 1].
pub fn similarity_from_distance(distance: f32) -> f32 {
    // f32::max drops NaN, so a NaN distance scores 0.
    (1.0 - distance).max(0.0)
}

/// Reduce candidates to the best-scoring face per person, then rank by
/// similarity (descending) and person id (ascending).
///
/// On equal scores the first candidate seen for a person is kept, so with
/// distance-ordered input the closest-ranked face wins.
pub fn aggregate(candidates: &[Candidate]) -> Vec<SearchResult> {
    let mut best: Vec<SearchResult> = Vec::with_capacity(candidates.len());
    let mut slot_by_person: HashMap<i64, usize> = HashMap::with_capacity(candidates.len());

    for c in candidates {
        let scored = SearchResult {
            face_id: c.face_id,
            category_id: c.category_id,
            person_id: c.person_id,
            display_name: c.display_name.clone(),
            disambiguation_tag: c.disambiguation_tag.clone(),
            similarity: similarity_from_distance(c.distance),
        };

        match slot_by_person.get(&c.person_id) {
            Some(&slot) => {
                if scored.similarity > best[slot].similarity {
                    best[slot] = scored;
                }
            }
            None => {
                slot_by_person.insert(c.person_id, best.len());
                best.push(scored);
            }
        }
    }

    best.sort_by(|a, b| match b.similarity.total_cmp(&a.similarity) {
        Ordering::Equal => a.person_id.cmp(&b.person_id),
        other => other,
    });
    best
}
