use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use facematch_core::catalog::{CategoryStore, FaceIndex, PeopleStore, StoreError};
use facematch_core::types::{Candidate, Category, NewFaceRecord, NewPerson, Person};

use crate::schema::SCHEMA;
use crate::vector::{embedding_to_bytes, register_functions};

/// Catalog backed by a single SQLite connection on a background thread.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).await.map_err(store_err)?;
        let catalog = Self::init(conn, true).await?;
        tracing::info!(path = %path.display(), "catalog opened");
        Ok(catalog)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(store_err)?;
        Self::init(conn, false).await
    }

    async fn init(conn: Connection, wal: bool) -> Result<Self, StoreError> {
        conn.call(move |conn| {
            if wal {
                let _mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            }
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.execute_batch(SCHEMA)?;
            register_functions(conn)?;
            Ok(())
        })
        .await
        .map_err(store_err)?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl FaceIndex for SqliteCatalog {
    async fn hash_exists(&self, phash: u64) -> Result<bool, StoreError> {
        self.conn
            .call(move |conn| {
                let found = conn
                    .query_row("SELECT 1 FROM faces WHERE phash = ?1", [phash as i64], |_| Ok(()))
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(store_err)
    }

    async fn insert_face(&self, record: &NewFaceRecord) -> Result<i64, StoreError> {
        let record = record.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let stored_dim: Option<i64> = conn
                    .query_row("SELECT length(embedding) / 4 FROM faces LIMIT 1", [], |row| row.get(0))
                    .optional()?;
                if let Some(expected) = stored_dim {
                    if expected as usize != record.embedding.len() {
                        return Ok(Err(StoreError::Dimension {
                            expected: expected as usize,
                            actual: record.embedding.len(),
                        }));
                    }
                }

                conn.execute(
                    "INSERT INTO faces (category_id, person_id, phash, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.category_id,
                        record.person_id,
                        record.phash as i64,
                        embedding_to_bytes(&record.embedding),
                        now(),
                    ],
                )?;
                Ok(Ok(conn.last_insert_rowid()))
            })
            .await
            .map_err(store_err)?;
        inserted
    }

    async fn nearest(
        &self,
        category_ids: &[i64],
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        if category_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let categories = serde_json::to_string(category_ids).map_err(|e| StoreError::Backend(e.to_string()))?;
        let query_dim = query.len();
        let query = embedding_to_bytes(query);

        let rows = self
            .conn
            .call(move |conn| {
                let stored_dim: Option<i64> = conn
                    .query_row("SELECT length(embedding) / 4 FROM faces LIMIT 1", [], |row| row.get(0))
                    .optional()?;
                match stored_dim {
                    None => return Ok(Ok(Vec::new())),
                    Some(expected) if expected as usize != query_dim => {
                        return Ok(Err(StoreError::Dimension {
                            expected: expected as usize,
                            actual: query_dim,
                        }));
                    }
                    Some(_) => {}
                }

                let mut stmt = conn.prepare(
                    "SELECT f.id, f.category_id, f.person_id, p.display_name, p.disambiguation_tag,
                            cosine_distance(f.embedding, ?1) AS distance
                     FROM faces f
                     JOIN people p ON p.id = f.person_id
                     WHERE f.category_id IN (SELECT value FROM json_each(?2))
                       AND p.is_hidden = 0
                     ORDER BY distance ASC, f.id ASC
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![query, categories, limit as i64], |row| {
                        Ok(Candidate {
                            face_id: row.get(0)?,
                            category_id: row.get(1)?,
                            person_id: row.get(2)?,
                            display_name: row.get(3)?,
                            disambiguation_tag: row.get(4)?,
                            distance: row.get::<_, f64>(5)? as f32,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Ok(rows))
            })
            .await
            .map_err(store_err)?;
        rows
    }
}

#[async_trait::async_trait]
impl PeopleStore for SqliteCatalog {
    async fn upsert_person(&self, person: &NewPerson) -> Result<i64, StoreError> {
        let person = person.clone();
        self.conn
            .call(move |conn| {
                // The no-op update makes RETURNING yield the existing row's id.
                let id = conn.query_row(
                    "INSERT INTO people (category_id, display_name, disambiguation_tag, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (category_id, display_name, disambiguation_tag)
                     DO UPDATE SET display_name = excluded.display_name
                     RETURNING id",
                    params![person.category_id, person.display_name, person.disambiguation_tag, now()],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await
            .map_err(store_err)
    }

    async fn search_people(&self, query: &str, limit: usize) -> Result<Vec<Person>, StoreError> {
        let needle = query.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.category_id, c.display_name, p.display_name,
                            p.disambiguation_tag, p.is_hidden
                     FROM people p
                     JOIN categories c ON c.id = p.category_id
                     WHERE instr(p.display_name, ?1) > 0
                     ORDER BY p.display_name, p.id
                     LIMIT ?2",
                )?;
                let people = stmt
                    .query_map(params![needle, limit as i64], |row| {
                        Ok(Person {
                            id: row.get(0)?,
                            category_id: row.get(1)?,
                            category_name: row.get(2)?,
                            display_name: row.get(3)?,
                            disambiguation_tag: row.get(4)?,
                            is_hidden: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(people)
            })
            .await
            .map_err(store_err)
    }

    async fn set_hidden(&self, person_id: i64, hidden: bool) -> Result<(), StoreError> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE people SET is_hidden = ?1 WHERE id = ?2",
                    params![hidden, person_id],
                )?)
            })
            .await
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("person {person_id}")));
        }
        tracing::info!(person_id, hidden, "person visibility changed");
        Ok(())
    }

    async fn purge_person(&self, person_id: i64) -> Result<usize, StoreError> {
        let purged = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let faces = tx.execute("DELETE FROM faces WHERE person_id = ?1", [person_id])?;
                let people = tx.execute("DELETE FROM people WHERE id = ?1", [person_id])?;
                if people == 0 {
                    // Dropping the transaction rolls it back.
                    return Ok(None);
                }
                tx.commit()?;
                Ok(Some(faces))
            })
            .await
            .map_err(store_err)?;

        let faces = purged.ok_or_else(|| StoreError::NotFound(format!("person {person_id}")))?;
        tracing::info!(person_id, faces, "person purged");
        Ok(faces)
    }
}

#[async_trait::async_trait]
impl CategoryStore for SqliteCatalog {
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, display_name, is_nsfw FROM categories ORDER BY display_name")?;
                let categories = stmt
                    .query_map([], |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            display_name: row.get(1)?,
                            is_nsfw: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(categories)
            })
            .await
            .map_err(store_err)
    }

    async fn category_id(&self, name: &str) -> Result<i64, StoreError> {
        let name = name.to_string();
        let lookup = name.clone();
        let id = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT id FROM categories WHERE display_name = ?1", [lookup], |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await
            .map_err(store_err)?;
        id.ok_or_else(|| StoreError::NotFound(format!("category {name:?}")))
    }

    async fn create_category(&self, name: &str, is_nsfw: bool) -> Result<i64, StoreError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO categories (display_name, is_nsfw, created_at) VALUES (?1, ?2, ?3)",
                    params![name, is_nsfw, now()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(store_err)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn store_err(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => sqlite_err(e),
        other => StoreError::Backend(other.to_string()),
    }
}

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            StoreError::Constraint(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}
