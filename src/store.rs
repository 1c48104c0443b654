//! # Document Store Adapter Module
//!
//! ## Purpose
//! Thin read-through cache of document snapshots between the external
//! content-management store and the index builder. The engine never polls a
//! database itself; it is handed documents through `index()`/`remove()` calls
//! and falls back to the injected [`DocumentSource`] only when a snapshot is
//! missing (display-field hydration, single-document repair).
//!
//! ## Input/Output Specification
//! - **Input**: Document ids; snapshot pushes from the write path
//! - **Output**: Canonical `SearchDocument` field values
//! - **Storage**: In-memory concurrent map; no durability owned here

use crate::errors::Result;
use crate::{DocId, SearchDocument};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Collaborator seam to the content-management store. Implementations are
/// injected at engine construction; tests use an in-memory map.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch the canonical snapshot for a document, `None` when it no
    /// longer exists upstream
    async fn fetch(&self, doc_id: &str) -> Result<Option<SearchDocument>>;
}

/// Read-through snapshot cache keyed by document id
pub struct StoreAdapter {
    source: Arc<dyn DocumentSource>,
    snapshots: DashMap<DocId, Arc<SearchDocument>>,
}

impl StoreAdapter {
    /// Create an adapter over the given source
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self {
            source,
            snapshots: DashMap::new(),
        }
    }

    /// Get a document snapshot, reading through to the source on miss
    pub async fn get(&self, doc_id: &str) -> Result<Option<Arc<SearchDocument>>> {
        if let Some(snapshot) = self.snapshots.get(doc_id) {
            return Ok(Some(snapshot.clone()));
        }
        match self.source.fetch(doc_id).await? {
            Some(doc) => {
                let doc = Arc::new(doc);
                self.snapshots.insert(doc.id.clone(), doc.clone());
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Store the snapshot pushed alongside an `index()` call
    pub fn put(&self, doc: SearchDocument) -> Arc<SearchDocument> {
        let doc = Arc::new(doc);
        self.snapshots.insert(doc.id.clone(), doc.clone());
        doc
    }

    /// Drop the snapshot for a removed document
    pub fn invalidate(&self, doc_id: &str) {
        self.snapshots.remove(doc_id);
    }

    /// Number of cached snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// In-memory document source backed by a concurrent map. Used by tests and
/// by callers that hold their corpus in process.
#[derive(Default)]
pub struct MemorySource {
    docs: DashMap<DocId, SearchDocument>,
}

impl MemorySource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document
    pub fn insert(&self, doc: SearchDocument) {
        self.docs.insert(doc.id.clone(), doc);
    }

    /// Remove a document
    pub fn remove(&self, doc_id: &str) {
        self.docs.remove(doc_id);
    }

    /// Snapshot of every stored document, ordered by id
    pub fn all(&self) -> Vec<SearchDocument> {
        let mut docs: Vec<SearchDocument> =
            self.docs.iter().map(|e| e.value().clone()).collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn fetch(&self, doc_id: &str) -> Result<Option<SearchDocument>> {
        Ok(self.docs.get(doc_id).map(|e| e.value().clone()))
    }
}
