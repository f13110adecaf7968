//! Batch ingestion of identity photos from an inbox directory.
//!
//! Each file is handled independently: parse the identity from the filename,
//! upsert the person, dedup on the perceptual hash, gate the embedding,
//! store the face record, then move the file to the finished directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

use crate::catalog::{CategoryStore, FaceIndex, PeopleStore, StoreError};
use crate::dhash::{self, HashError};
use crate::filename::{self, FilenameError};
use crate::gate::{self, EmbeddingGate, GateError};
use crate::provider::EmbeddingProvider;
use crate::types::{NewFaceRecord, NewPerson};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Filename(#[from] FilenameError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("already processed (phash {phash:016x})")]
    Duplicate { phash: u64 },
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("stored face {face_id} for person {person_id} but could not archive {filename}: {source}")]
    Archive {
        filename: String,
        person_id: i64,
        face_id: i64,
        #[source]
        source: io::Error,
    },
    #[error("image worker: {0}")]
    Worker(#[from] JoinError),
}

/// Pending and finished photo directories.
#[derive(Debug, Clone)]
pub struct Inbox {
    input_dir: PathBuf,
    finished_dir: PathBuf,
}

impl Inbox {
    pub fn new(input_dir: impl Into<PathBuf>, finished_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            finished_dir: finished_dir.into(),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn finished_dir(&self) -> &Path {
        &self.finished_dir
    }

    /// Supported image files waiting in the input directory, sorted by name.
    pub async fn pending(&self) -> io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.input_dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if !filename::is_supported_image(&path) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::warn!(name = ?raw, "skipping non-UTF-8 filename"),
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.input_dir.join(name)).await
    }

    /// Move `name` from the input directory into the finished directory.
    pub async fn archive(&self, name: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.finished_dir).await?;
        tokio::fs::rename(self.input_dir.join(name), self.finished_dir.join(name)).await
    }
}

/// Ids created for one ingested photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestedFace {
    pub person_id: i64,
    pub face_id: i64,
    pub phash: u64,
}

/// Per-batch outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct IngestionPipeline<P, S> {
    gate: EmbeddingGate<P>,
    store: S,
    inbox: Inbox,
}

impl<P, S> IngestionPipeline<P, S>
where
    P: EmbeddingProvider,
    S: FaceIndex + PeopleStore + CategoryStore,
{
    pub fn new(gate: EmbeddingGate<P>, store: S, inbox: Inbox) -> Self {
        Self { gate, store, inbox }
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Ingest one inbox file into `category_id`.
    ///
    /// A stored face whose file could not be archived is reported as
    /// [`IngestError::Archive`]; the record is kept.
    pub async fn ingest(&self, category_id: i64, filename: &str) -> Result<IngestedFace, IngestError> {
        let parsed = filename::parse_inbox_filename(filename)?;

        let person_id = self
            .store
            .upsert_person(&NewPerson {
                category_id,
                display_name: parsed.name,
                disambiguation_tag: parsed.tag,
            })
            .await?;

        let bytes = self.inbox.read(filename).await.map_err(|source| IngestError::Read {
            path: self.inbox.input_dir.join(filename),
            source,
        })?;

        // Decoded once; the gate's quality checks reuse the same image.
        let (bytes, hashed) = gate::run_blocking(move || {
            let hashed = dhash::decode_and_hash(&bytes);
            (bytes, hashed)
        })
        .await?;
        let (decoded, phash) = hashed?;
        if self.store.hash_exists(phash).await? {
            return Err(IngestError::Duplicate { phash });
        }

        let embedding = self
            .gate
            .fetch_validated_embedding_decoded(&bytes, Arc::new(decoded))
            .await?;

        let face_id = self
            .store
            .insert_face(&NewFaceRecord {
                category_id,
                person_id,
                phash,
                embedding,
            })
            .await?;

        if let Err(source) = self.inbox.archive(filename).await {
            tracing::error!(
                filename,
                person_id,
                face_id,
                error = %source,
                "face stored but file not archived; move it manually"
            );
            return Err(IngestError::Archive {
                filename: filename.to_string(),
                person_id,
                face_id,
                source,
            });
        }

        Ok(IngestedFace {
            person_id,
            face_id,
            phash,
        })
    }

    /// Ingest every pending file into the category named `category_name`.
    ///
    /// Per-file failures are logged and counted; only resolving the category
    /// or listing the inbox can fail the batch.
    pub async fn import(&self, category_name: &str) -> Result<ImportReport, IngestError> {
        let category_id = self.store.category_id(category_name).await?;
        let pending = self.inbox.pending().await.map_err(|source| IngestError::Read {
            path: self.inbox.input_dir.clone(),
            source,
        })?;

        tracing::info!(
            category = category_name,
            category_id,
            files = pending.len(),
            input = %self.inbox.input_dir.display(),
            "import started"
        );

        let mut report = ImportReport {
            total: pending.len(),
            ..Default::default()
        };

        for name in &pending {
            match self.ingest(category_id, name).await {
                Ok(face) => {
                    report.imported += 1;
                    tracing::info!(
                        filename = %name,
                        person_id = face.person_id,
                        face_id = face.face_id,
                        "imported"
                    );
                }
                Err(IngestError::Duplicate { phash }) => {
                    report.duplicates += 1;
                    tracing::info!(filename = %name, phash = %format!("{phash:016x}"), "skipped duplicate");
                }
                Err(e) => {
                    report.failed += 1;
                    // Archive failures were already logged with reconciliation details.
                    if !matches!(e, IngestError::Archive { .. }) {
                        tracing::warn!(filename = %name, error = %e, "import failed");
                    }
                }
            }
        }

        tracing::info!(
            category = category_name,
            total = report.total,
            imported = report.imported,
            duplicates = report.duplicates,
            failed = report.failed,
            "import finished"
        );
        Ok(report)
    }
}
