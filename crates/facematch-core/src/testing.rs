//! In-memory provider and catalog used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{CategoryStore, FaceIndex, PeopleStore, StoreError};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{cosine_distance, Candidate, Category, Detection, NewFaceRecord, NewPerson, Person};

/// Provider returning a canned detection (or error) and counting calls.
pub(crate) struct FakeProvider {
    reply: Box<dyn Fn() -> Result<Detection, ProviderError> + Send + Sync>,
    calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub(crate) fn ok(detection: Detection) -> Self {
        Self {
            reply: Box::new(move || Ok(detection.clone())),
            calls: Arc::default(),
        }
    }

    pub(crate) fn err(make: impl Fn() -> ProviderError + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(move || Err(make())),
            calls: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FakeProvider {
    async fn detect(&self, _image: &[u8]) -> Result<Detection, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)()
    }
}

#[derive(Default)]
struct State {
    categories: Vec<Category>,
    people: Vec<Person>,
    faces: Vec<(i64, NewFaceRecord)>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Brute-force catalog with the same uniqueness rules as the SQLite store.
#[derive(Clone, Default)]
pub(crate) struct MemoryCatalog {
    state: Arc<Mutex<State>>,
}

impl MemoryCatalog {
    pub(crate) fn face_count(&self) -> usize {
        self.state.lock().unwrap().faces.len()
    }

    pub(crate) fn person_count(&self) -> usize {
        self.state.lock().unwrap().people.len()
    }
}

#[async_trait::async_trait]
impl FaceIndex for MemoryCatalog {
    async fn hash_exists(&self, phash: u64) -> Result<bool, StoreError> {
        Ok(self.state.lock().unwrap().faces.iter().any(|(_, f)| f.phash == phash))
    }

    async fn insert_face(&self, record: &NewFaceRecord) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.faces.iter().any(|(_, f)| f.phash == record.phash) {
            return Err(StoreError::Constraint(format!("duplicate phash {}", record.phash)));
        }
        let id = state.next_id();
        state.faces.push((id, record.clone()));
        Ok(id)
    }

    async fn nearest(
        &self,
        category_ids: &[i64],
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<Candidate> = state
            .faces
            .iter()
            .filter(|(_, f)| category_ids.contains(&f.category_id))
            .filter_map(|(id, f)| {
                let person = state.people.iter().find(|p| p.id == f.person_id && !p.is_hidden)?;
                Some(Candidate {
                    face_id: *id,
                    category_id: f.category_id,
                    person_id: f.person_id,
                    display_name: person.display_name.clone(),
                    disambiguation_tag: person.disambiguation_tag.clone(),
                    distance: cosine_distance(query, &f.embedding),
                })
            })
            .collect();
        out.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.face_id.cmp(&b.face_id)));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait::async_trait]
impl PeopleStore for MemoryCatalog {
    async fn upsert_person(&self, person: &NewPerson) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.people.iter().find(|p| {
            p.category_id == person.category_id
                && p.display_name == person.display_name
                && p.disambiguation_tag == person.disambiguation_tag
        }) {
            return Ok(existing.id);
        }
        let category_name = state
            .categories
            .iter()
            .find(|c| c.id == person.category_id)
            .map(|c| c.display_name.clone())
            .ok_or_else(|| StoreError::Constraint(format!("no category {}", person.category_id)))?;
        let id = state.next_id();
        state.people.push(Person {
            id,
            category_id: person.category_id,
            category_name,
            display_name: person.display_name.clone(),
            disambiguation_tag: person.disambiguation_tag.clone(),
            is_hidden: false,
        });
        Ok(id)
    }

    async fn search_people(&self, query: &str, limit: usize) -> Result<Vec<Person>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .people
            .iter()
            .filter(|p| p.display_name.contains(query))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_hidden(&self, person_id: i64, hidden: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let person = state
            .people
            .iter_mut()
            .find(|p| p.id == person_id)
            .ok_or_else(|| StoreError::NotFound(format!("person {person_id}")))?;
        person.is_hidden = hidden;
        Ok(())
    }

    async fn purge_person(&self, person_id: i64) -> Result<usize, StoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.faces.len();
        state.faces.retain(|(_, f)| f.person_id != person_id);
        let removed = before - state.faces.len();
        state.people.retain(|p| p.id != person_id);
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl CategoryStore for MemoryCatalog {
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let mut categories = self.state.lock().unwrap().categories.clone();
        categories.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(categories)
    }

    async fn category_id(&self, name: &str) -> Result<i64, StoreError> {
        self.state
            .lock()
            .unwrap()
            .categories
            .iter()
            .find(|c| c.display_name == name)
            .map(|c| c.id)
            .ok_or_else(|| StoreError::NotFound(format!("category {name:?}")))
    }

    async fn create_category(&self, name: &str, is_nsfw: bool) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.categories.iter().any(|c| c.display_name == name) {
            return Err(StoreError::Constraint(format!("duplicate category {name:?}")));
        }
        let id = state.next_id();
        state.categories.push(Category {
            id,
            display_name: name.to_string(),
            is_nsfw,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_category_name_is_constraint() {
        let catalog = MemoryCatalog::default();
        let id = catalog.create_category("idols", false).await.unwrap();
        assert!(matches!(
            catalog.create_category("idols", true).await,
            Err(StoreError::Constraint(_))
        ));
        assert_eq!(catalog.category_id("idols").await.unwrap(), id);
        assert_eq!(catalog.list_categories().await.unwrap().len(), 1);
        // Names are compared exactly.
        catalog.create_category("Idols", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_people_is_case_sensitive() {
        let catalog = MemoryCatalog::default();
        let category_id = catalog.create_category("idols", false).await.unwrap();
        catalog
            .upsert_person(&NewPerson {
                category_id,
                display_name: "Kim Minji".into(),
                disambiguation_tag: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(catalog.search_people("Kim", 10).await.unwrap().len(), 1);
        assert!(catalog.search_people("kim", 10).await.unwrap().is_empty());
    }
}
