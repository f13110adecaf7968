//! facematch-core — Face identity matching pipeline.
//!
//! Photos are deduplicated by a 64-bit dHash, embedded by an external
//! detector/embedder sidecar, and only stored or searched once the detected
//! face passes the quality gate. Storage is injected through the traits in
//! [`catalog`].

pub mod catalog;
pub mod config;
pub mod dhash;
pub mod filename;
pub mod gate;
pub mod ingest;
pub mod provider;
pub mod quality;
pub mod search;
pub mod types;

#[cfg(test)]
mod testing;

pub use catalog::{CategoryStore, FaceIndex, PeopleStore, StoreError};
pub use config::Settings;
pub use gate::{EmbeddingGate, GateError};
pub use ingest::{ImportReport, Inbox, IngestError, IngestionPipeline};
pub use provider::{EmbeddingProvider, ProviderError, SidecarProvider};
pub use quality::{QualityRejection, QualityThresholds};
pub use search::{SearchError, SimilaritySearch};
pub use types::{Candidate, Category, NewFaceRecord, NewPerson, Person, SearchResult};
