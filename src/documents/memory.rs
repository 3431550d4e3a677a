//! In-process document store.
//!
//! Used by the plan replay binary and by tests. Ids are assigned from a
//! single counter, so they increase monotonically across all kinds.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{
    Document, DocumentFilter, DocumentRepository, DocumentUpdate, NewDocument, Organization,
    Project, RepositoryError,
};

#[derive(Default)]
struct Store {
    organizations: BTreeMap<i64, Organization>,
    projects: BTreeMap<i64, Project>,
    documents: BTreeMap<i64, Document>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(self, id: i64, name: &str) -> Self {
        self.lock().organizations.insert(
            id,
            Organization {
                id,
                name: name.to_string(),
            },
        );
        self
    }

    pub fn with_project(self, id: i64, organization_id: i64, name: &str) -> Self {
        self.lock().projects.insert(
            id,
            Project {
                id,
                organization_id,
                name: name.to_string(),
            },
        );
        self
    }

    /// Inserts a document as-is, bypassing id assignment. Later ids
    /// continue above the highest id seen.
    pub fn insert_document(&self, doc: Document) {
        let mut store = self.lock();
        store.next_id = store.next_id.max(doc.id);
        store.documents.insert(doc.id, doc);
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        // Writers never leave a half-applied entry behind
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentRepository for InMemoryRepository {
    fn organization(&self, id: i64) -> Result<Option<Organization>, RepositoryError> {
        Ok(self.lock().organizations.get(&id).cloned())
    }

    fn project(&self, id: i64) -> Result<Option<Project>, RepositoryError> {
        Ok(self.lock().projects.get(&id).cloned())
    }

    fn get(&self, id: i64) -> Result<Option<Document>, RepositoryError> {
        Ok(self.lock().documents.get(&id).cloned())
    }

    fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>, RepositoryError> {
        let store = self.lock();
        Ok(store
            .documents
            .values()
            .filter(|d| d.organization_id == filter.organization_id)
            .filter(|d| filter.project_id.is_none() || d.project_id == filter.project_id)
            .filter(|d| filter.kind.map_or(true, |k| d.kind == k))
            .cloned()
            .collect())
    }

    fn create(&self, doc: NewDocument) -> Result<Document, RepositoryError> {
        let mut store = self.lock();
        store.next_id = store
            .next_id
            .checked_add(1)
            .ok_or_else(|| RepositoryError::Backend("document id space exhausted".to_string()))?;
        let now = Utc::now();
        let document = Document {
            id: store.next_id,
            kind: doc.kind,
            name: doc.name,
            content: doc.content,
            organization_id: doc.organization_id,
            project_id: doc.project_id,
            created_at: now,
            updated_at: now,
        };
        store.documents.insert(document.id, document.clone());
        Ok(document)
    }

    fn update(&self, id: i64, update: &DocumentUpdate) -> Result<Document, RepositoryError> {
        let mut store = self.lock();
        let doc = store
            .documents
            .get_mut(&id)
            .ok_or(RepositoryError::DocumentNotFound(id))?;
        if let Some(name) = &update.name {
            doc.name = name.clone();
        }
        if let Some(content) = &update.content {
            doc.content = content.clone();
        }
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }
}
