//! Document repository: the storage seam for documents, lines and
//! invalidation events.

use crate::error::RepositoryError;
use crate::models::{DocumentStatus, DocumentType, FiscalDocument, InvalidationEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Criteria for [`DocumentRepository::list_documents`]. Empty vectors match all.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub document_types: Vec<DocumentType>,
    pub statuses: Vec<DocumentStatus>,
    /// Inclusive lower bound on `issued_at`.
    pub issued_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `issued_at`.
    pub issued_until: Option<DateTime<Utc>>,
    pub branch_id: Option<Uuid>,
}

impl DocumentFilter {
    pub fn matches(&self, document: &FiscalDocument) -> bool {
        (self.document_types.is_empty() || self.document_types.contains(&document.document_type))
            && (self.statuses.is_empty() || self.statuses.contains(&document.status))
            && self.issued_from.map_or(true, |from| document.issued_at >= from)
            && self.issued_until.map_or(true, |until| document.issued_at < until)
            && self.branch_id.map_or(true, |branch| document.branch_id == Some(branch))
    }
}

/// Persistence for fiscal documents and their invalidation events.
///
/// Writes are conditional: `save` succeeds only when the stored version equals
/// `document.version`, and stores `version + 1`.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<FiscalDocument>, RepositoryError>;

    async fn get_by_generation_code(
        &self,
        generation_code: Uuid,
    ) -> Result<Option<FiscalDocument>, RepositoryError>;

    /// Documents matching `filter`, ordered by issue time then generation code,
    /// read from a single consistent snapshot.
    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<FiscalDocument>, RepositoryError>;

    /// Notes issued against `original_id`, in creation order.
    async fn list_notes_for(
        &self,
        original_id: Uuid,
    ) -> Result<Vec<FiscalDocument>, RepositoryError>;

    /// Next control-number sequence for (type, establishment), starting at 1.
    async fn allocate_control_sequence(
        &self,
        document_type: DocumentType,
        establishment_code: &str,
    ) -> Result<i64, RepositoryError>;

    async fn insert(&self, document: &FiscalDocument) -> Result<(), RepositoryError>;

    /// Persist `document` and, when given, upsert `invalidation` in one atomic
    /// write. Returns the stored document with its new version.
    async fn save(
        &self,
        document: &FiscalDocument,
        invalidation: Option<&InvalidationEvent>,
    ) -> Result<FiscalDocument, RepositoryError>;

    async fn get_invalidation(
        &self,
        id: Uuid,
    ) -> Result<Option<InvalidationEvent>, RepositoryError>;

    /// Invalidation events filed against `document_id`, oldest first.
    async fn list_invalidations(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<InvalidationEvent>, RepositoryError>;

    async fn health_check(&self) -> Result<(), RepositoryError>;

    /// Original of a note.
    async fn get_original(&self, note_id: Uuid) -> Result<Option<FiscalDocument>, RepositoryError> {
        match self.get(note_id).await?.and_then(|note| note.original_document_id) {
            Some(original_id) => self.get(original_id).await,
            None => Ok(None),
        }
    }

    /// Processed documents of the given types issued in `[from, until)`.
    async fn list_processed(
        &self,
        document_types: &[DocumentType],
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<FiscalDocument>, RepositoryError> {
        self.list_documents(&DocumentFilter {
            document_types: document_types.to_vec(),
            statuses: vec![DocumentStatus::Processed],
            issued_from: Some(from),
            issued_until: Some(until),
            branch_id,
        })
        .await
    }

    /// The event currently occupying the invalidation slot, if any.
    async fn active_invalidation(
        &self,
        document_id: Uuid,
    ) -> Result<Option<InvalidationEvent>, RepositoryError> {
        Ok(self
            .list_invalidations(document_id)
            .await?
            .into_iter()
            .find(|event| event.status.is_active()))
    }
}

#[derive(Default)]
struct Store {
    documents: HashMap<Uuid, FiscalDocument>,
    by_generation_code: HashMap<Uuid, Uuid>,
    invalidations: HashMap<Uuid, InvalidationEvent>,
    sequences: HashMap<(DocumentType, String), i64>,
}

/// Repository held entirely in memory, for tests and `STORAGE_BACKEND=memory`.
#[derive(Default)]
pub struct InMemoryDocumentRepository {
    store: RwLock<Store>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_documents(documents: &mut [FiscalDocument]) {
    documents.sort_by(|a, b| {
        a.issued_at
            .cmp(&b.issued_at)
            .then_with(|| a.generation_code.cmp(&b.generation_code))
    });
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<FiscalDocument>, RepositoryError> {
        Ok(self.store.read().await.documents.get(&id).cloned())
    }

    async fn get_by_generation_code(
        &self,
        generation_code: Uuid,
    ) -> Result<Option<FiscalDocument>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .by_generation_code
            .get(&generation_code)
            .and_then(|id| store.documents.get(id))
            .cloned())
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<FiscalDocument>, RepositoryError> {
        let store = self.store.read().await;
        let mut documents: Vec<FiscalDocument> = store
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        sort_documents(&mut documents);
        Ok(documents)
    }

    async fn list_notes_for(
        &self,
        original_id: Uuid,
    ) -> Result<Vec<FiscalDocument>, RepositoryError> {
        let store = self.store.read().await;
        let mut notes: Vec<FiscalDocument> = store
            .documents
            .values()
            .filter(|d| d.original_document_id == Some(original_id) && d.document_type.is_note())
            .cloned()
            .collect();
        notes.sort_by_key(|d| d.created_utc);
        Ok(notes)
    }

    async fn allocate_control_sequence(
        &self,
        document_type: DocumentType,
        establishment_code: &str,
    ) -> Result<i64, RepositoryError> {
        let mut store = self.store.write().await;
        let next = store
            .sequences
            .entry((document_type, establishment_code.to_string()))
            .or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn insert(&self, document: &FiscalDocument) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.documents.contains_key(&document.id)
            || store.by_generation_code.contains_key(&document.generation_code)
        {
            return Err(RepositoryError::Conflict {
                entity: "document",
                id: document.id.to_string(),
            });
        }
        store
            .by_generation_code
            .insert(document.generation_code, document.id);
        store.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn save(
        &self,
        document: &FiscalDocument,
        invalidation: Option<&InvalidationEvent>,
    ) -> Result<FiscalDocument, RepositoryError> {
        let mut store = self.store.write().await;

        let current = store
            .documents
            .get(&document.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("document {}", document.id)))?;
        if current.version != document.version {
            return Err(RepositoryError::Conflict {
                entity: "document",
                id: document.id.to_string(),
            });
        }

        if let Some(event) = invalidation {
            if event.target_document_id != document.id {
                return Err(RepositoryError::Corrupt(format!(
                    "invalidation {} does not target document {}",
                    event.id, document.id
                )));
            }
            let slot_taken = store.invalidations.values().any(|existing| {
                existing.target_document_id == event.target_document_id
                    && existing.id != event.id
                    && existing.status.is_active()
            });
            if slot_taken && event.status.is_active() {
                return Err(RepositoryError::Conflict {
                    entity: "invalidation",
                    id: event.target_document_id.to_string(),
                });
            }
        }

        let mut stored = document.clone();
        stored.version += 1;
        store.documents.insert(stored.id, stored.clone());
        if let Some(event) = invalidation {
            store.invalidations.insert(event.id, event.clone());
        }
        Ok(stored)
    }

    async fn get_invalidation(
        &self,
        id: Uuid,
    ) -> Result<Option<InvalidationEvent>, RepositoryError> {
        Ok(self.store.read().await.invalidations.get(&id).cloned())
    }

    async fn list_invalidations(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<InvalidationEvent>, RepositoryError> {
        let store = self.store.read().await;
        let mut events: Vec<InvalidationEvent> = store
            .invalidations
            .values()
            .filter(|e| e.target_document_id == document_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_utc);
        Ok(events)
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
