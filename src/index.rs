//! # Index Builder Module
//!
//! ## Purpose
//! Maintains the inverted index (term → postings) and forward index
//! (document → term statistics) as immutable, versioned generations.
//! Add/update/delete operations stage their changes and atomically publish a
//! new generation; readers always observe one fully consistent snapshot.
//!
//! ## Input/Output Specification
//! - **Input**: `SearchDocument` snapshots, removal notifications, full
//!   reindex sources
//! - **Output**: Published [`IndexGeneration`] snapshots
//! - **Concurrency**: Single writer serialized by a mutex; readers take an
//!   atomic reference to the current generation and never block on writes
//!
//! ## Key Features
//! - Per-field analysis with field masks and position offsets
//! - O(1) writer-lock hold time for full reindexes (built off to the side)
//! - Cancellable batched reindex with per-document failure isolation
//! - Forward/inverted consistency checking for isolated self-repair

use crate::errors::{Result, SearchError};
use crate::tokenizer::Tokenizer;
use crate::utils::CancelToken;
use crate::{DocId, Field, SearchDocument};
use fst::Set as FstSet;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Documents analyzed per batch during a full reindex; the cancellation
/// token is checked between batches
const REINDEX_BATCH_SIZE: usize = 256;

/// Position offset separating fields within one document, so phrase
/// adjacency never spans a field boundary
const FIELD_POSITION_SPAN: u32 = 1 << 20;

/// Occurrence statistics for one `(term, document)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingStats {
    /// Number of occurrences across all fields; always at least 1
    pub term_frequency: u32,
    /// Bitmask of the fields the term occurred in
    pub field_mask: u8,
    /// Ascending positions, offset per field
    pub positions: Vec<u32>,
}

/// Per-document statistics backing length normalization and the
/// recommendation engine's vector similarity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardEntry {
    /// Total analyzed token count
    pub doc_length: u32,
    /// Token count per field
    pub field_lengths: BTreeMap<Field, u32>,
    /// Term → frequency over the whole document
    pub term_vector: BTreeMap<String, u32>,
}

/// Immutable, versioned snapshot of the full index. Exactly one generation
/// is current at any instant; readers holding an older generation continue
/// to see a consistent (stale but valid) view.
pub struct IndexGeneration {
    /// Monotonic version, incremented on every publication
    pub version: u64,
    /// Term → per-document posting statistics, ordered by doc id
    postings: HashMap<String, BTreeMap<DocId, PostingStats>>,
    /// Document → analyzed statistics
    forward: HashMap<DocId, ForwardEntry>,
    /// Document snapshots for filtering, faceting, and display
    docs: HashMap<DocId, Arc<SearchDocument>>,
    /// Sorted term dictionary for prefix enumeration
    term_dict: FstSet<Vec<u8>>,
    /// Number of indexed documents
    pub doc_count: usize,
    /// Mean analyzed document length
    pub avg_doc_length: f64,
}

impl IndexGeneration {
    /// The empty generation every index starts from
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            version: 0,
            postings: HashMap::new(),
            forward: HashMap::new(),
            docs: HashMap::new(),
            term_dict: FstSet::from_iter(std::iter::empty::<&[u8]>())
                .expect("empty term dictionary"),
            doc_count: 0,
            avg_doc_length: 0.0,
        })
    }

    /// Postings for a term, ordered by doc id
    pub fn postings(&self, term: &str) -> Option<&BTreeMap<DocId, PostingStats>> {
        self.postings.get(term)
    }

    /// Number of documents containing the term
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, |p| p.len())
    }

    /// Forward entry for a document
    pub fn forward(&self, doc_id: &str) -> Option<&ForwardEntry> {
        self.forward.get(doc_id)
    }

    /// Document snapshot
    pub fn doc(&self, doc_id: &str) -> Option<&Arc<SearchDocument>> {
        self.docs.get(doc_id)
    }

    /// Whether a document is present in this generation
    pub fn contains(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    /// All document snapshots, unordered
    pub fn all_docs(&self) -> impl Iterator<Item = &Arc<SearchDocument>> {
        self.docs.values()
    }

    /// Sorted term dictionary for the suggestion engine
    pub fn term_dict(&self) -> &FstSet<Vec<u8>> {
        &self.term_dict
    }

    /// Documents referenced by postings but missing a forward entry.
    /// A non-empty result indicates an inconsistency requiring isolated
    /// repair of the named documents.
    pub fn integrity_issues(&self) -> Vec<DocId> {
        let mut missing: Vec<DocId> = self
            .postings
            .values()
            .flat_map(|by_doc| by_doc.keys())
            .filter(|doc_id| !self.forward.contains_key(*doc_id))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Staged analysis of a single document, ready to merge into a generation
#[derive(Debug, Clone)]
pub struct DocAnalysis {
    doc: Arc<SearchDocument>,
    postings: BTreeMap<String, PostingStats>,
    forward: ForwardEntry,
}

/// Analyze every indexed field of a document.
///
/// Fails with `DocumentIndexingFailure` when normalization leaves nothing
/// to index; the caller logs and skips the document without aborting its
/// batch.
pub fn analyze_document(tokenizer: &Tokenizer, doc: Arc<SearchDocument>) -> Result<DocAnalysis> {
    let mut postings: BTreeMap<String, PostingStats> = BTreeMap::new();
    let mut field_lengths: BTreeMap<Field, u32> = BTreeMap::new();
    let mut term_vector: BTreeMap<String, u32> = BTreeMap::new();
    let mut doc_length: u32 = 0;

    for (ordinal, field) in Field::all().into_iter().enumerate() {
        let text = match field {
            Field::Title => doc.title.clone(),
            Field::Content => doc.content.clone(),
            Field::Summary => doc.summary.clone().unwrap_or_default(),
            Field::Tags => doc.tags.iter().cloned().collect::<Vec<_>>().join(" "),
            Field::Categories => doc.categories.iter().cloned().collect::<Vec<_>>().join(" "),
        };
        if text.is_empty() {
            continue;
        }

        let base = ordinal as u32 * FIELD_POSITION_SPAN;
        let tokens = tokenizer.analyze(&text, field);
        let mut field_len: u32 = 0;
        for token in tokens {
            let stats = postings.entry(token.text.clone()).or_insert(PostingStats {
                term_frequency: 0,
                field_mask: 0,
                positions: Vec::new(),
            });
            stats.term_frequency += 1;
            stats.field_mask |= field.mask_bit();
            stats.positions.push(base + token.position);
            *term_vector.entry(token.text).or_insert(0) += 1;
            field_len += 1;
        }
        if field_len > 0 {
            field_lengths.insert(field, field_len);
            doc_length += field_len;
        }
    }

    if doc_length == 0 {
        return Err(SearchError::DocumentIndexingFailure {
            doc_id: doc.id.clone(),
            reason: "no indexable tokens after normalization".to_string(),
        });
    }

    for stats in postings.values_mut() {
        stats.positions.sort_unstable();
    }

    Ok(DocAnalysis {
        doc,
        postings,
        forward: ForwardEntry {
            doc_length,
            field_lengths,
            term_vector,
        },
    })
}

/// Outcome of a cancellable full reindex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexReport {
    /// Documents successfully indexed into the new generation
    pub indexed: usize,
    /// Documents skipped due to analysis failures
    pub skipped: usize,
}

/// Single-writer owner of the current generation pointer
pub struct IndexBuilder {
    tokenizer: Arc<Tokenizer>,
    current: RwLock<Arc<IndexGeneration>>,
    /// Serializes all mutations; never held while readers run
    writer: Mutex<()>,
}

impl IndexBuilder {
    /// Create an empty index
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            tokenizer,
            current: RwLock::new(IndexGeneration::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Reference to the current generation; callers operate entirely
    /// against this immutable snapshot
    pub fn current(&self) -> Arc<IndexGeneration> {
        self.current.read().clone()
    }

    /// Tokenizer shared with the query parser
    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }

    /// Index or re-index a single document, publishing a new generation
    pub fn index_document(&self, doc: Arc<SearchDocument>) -> Result<()> {
        let analysis = analyze_document(&self.tokenizer, doc)?;

        let _guard = self.writer.lock();
        let base = self.current();
        let mut staged = StagedGeneration::from(&*base);
        staged.remove(&analysis.doc.id);
        staged.merge(analysis);
        let generation = staged.publish(base.version + 1)?;
        tracing::debug!(
            version = generation.version,
            docs = generation.doc_count,
            "published generation"
        );
        *self.current.write() = generation;
        Ok(())
    }

    /// Remove a document; returns false when it was not indexed
    pub fn remove_document(&self, doc_id: &str) -> Result<bool> {
        let _guard = self.writer.lock();
        let base = self.current();
        if !base.contains(doc_id) {
            return Ok(false);
        }
        let mut staged = StagedGeneration::from(&*base);
        staged.remove(doc_id);
        let generation = staged.publish(base.version + 1)?;
        tracing::debug!(
            version = generation.version,
            doc_id,
            "published generation after removal"
        );
        *self.current.write() = generation;
        Ok(true)
    }

    /// Rebuild the entire index from scratch without blocking readers.
    ///
    /// The replacement generation is constructed off to the side in batches;
    /// the writer lock is taken only for the final pointer swap. Documents
    /// that fail analysis are logged and skipped. The cancellation token is
    /// checked between batches; cancellation leaves the previous generation
    /// untouched.
    pub fn reindex_all(
        &self,
        docs: Vec<SearchDocument>,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        let mut staged = StagedGeneration::default();
        let mut indexed = 0usize;
        let mut skipped = 0usize;

        for batch in docs.chunks(REINDEX_BATCH_SIZE) {
            if cancel.is_cancelled() {
                tracing::info!(indexed, "reindex cancelled, keeping current generation");
                return Err(SearchError::ReindexCancelled { indexed });
            }

            let analyses: Vec<(DocId, Result<DocAnalysis>)> = batch
                .par_iter()
                .map(|doc| {
                    let doc = Arc::new(doc.clone());
                    (doc.id.clone(), analyze_document(&self.tokenizer, doc))
                })
                .collect();

            for (doc_id, analysis) in analyses {
                match analysis {
                    Ok(analysis) => {
                        staged.remove(&doc_id);
                        staged.merge(analysis);
                        indexed += 1;
                    }
                    Err(err) => {
                        tracing::warn!(doc_id = %doc_id, error = %err, "skipping document during reindex");
                        skipped += 1;
                    }
                }
            }
        }

        // Writer lock held only for version assignment and the pointer swap
        let _guard = self.writer.lock();
        let base_version = self.current().version;
        let generation = staged.publish(base_version + 1)?;
        tracing::info!(
            version = generation.version,
            indexed,
            skipped,
            "published rebuilt generation"
        );
        *self.current.write() = generation;
        Ok(ReindexReport { indexed, skipped })
    }

    /// Publish a generation whose forward entry for `doc_id` is missing
    /// while its postings remain, so tests can exercise the repair path.
    #[cfg(test)]
    pub(crate) fn drop_forward_entry(&self, doc_id: &str) {
        let _guard = self.writer.lock();
        let base = self.current();
        let mut staged = StagedGeneration::from(&*base);
        staged.forward.remove(doc_id);
        let generation = staged
            .publish(base.version + 1)
            .expect("publishing without a forward entry");
        *self.current.write() = generation;
    }
}

/// Mutable working copy of a generation's maps, private to the writer
#[derive(Default)]
struct StagedGeneration {
    postings: HashMap<String, BTreeMap<DocId, PostingStats>>,
    forward: HashMap<DocId, ForwardEntry>,
    docs: HashMap<DocId, Arc<SearchDocument>>,
}

impl StagedGeneration {
    fn from(base: &IndexGeneration) -> Self {
        Self {
            postings: base.postings.clone(),
            forward: base.forward.clone(),
            docs: base.docs.clone(),
        }
    }

    /// Remove every trace of a document
    fn remove(&mut self, doc_id: &str) {
        if let Some(entry) = self.forward.remove(doc_id) {
            for term in entry.term_vector.keys() {
                if let Some(by_doc) = self.postings.get_mut(term) {
                    by_doc.remove(doc_id);
                    if by_doc.is_empty() {
                        self.postings.remove(term);
                    }
                }
            }
        }
        self.docs.remove(doc_id);
    }

    /// Merge a staged document analysis
    fn merge(&mut self, analysis: DocAnalysis) {
        let doc_id = analysis.doc.id.clone();
        for (term, stats) in analysis.postings {
            self.postings
                .entry(term)
                .or_default()
                .insert(doc_id.clone(), stats);
        }
        self.forward.insert(doc_id.clone(), analysis.forward);
        self.docs.insert(doc_id, analysis.doc);
    }

    /// Freeze into an immutable generation with the given version
    fn publish(self, version: u64) -> Result<Arc<IndexGeneration>> {
        let doc_count = self.forward.len();
        let total_length: u64 = self.forward.values().map(|f| f.doc_length as u64).sum();
        let avg_doc_length = if doc_count == 0 {
            0.0
        } else {
            total_length as f64 / doc_count as f64
        };

        let mut terms: Vec<&String> = self.postings.keys().collect();
        terms.sort();
        let term_dict =
            FstSet::from_iter(terms).map_err(|e| SearchError::TermDictionary {
                reason: e.to_string(),
            })?;

        Ok(Arc::new(IndexGeneration {
            version,
            postings: self.postings,
            forward: self.forward,
            docs: self.docs,
            term_dict,
            doc_count,
            avg_doc_length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::{AccessLevel, EntityType};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn tokenizer() -> Arc<Tokenizer> {
        Arc::new(Tokenizer::new(&TokenizerConfig::default()))
    }

    fn doc(id: &str, title: &str, content: &str) -> Arc<SearchDocument> {
        Arc::new(SearchDocument {
            id: id.to_string(),
            entity_id: id.to_string(),
            entity_type: EntityType::Article,
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            tags: BTreeSet::new(),
            categories: BTreeSet::new(),
            language: "mixed".to_string(),
            access_level: AccessLevel::Internal,
            author_id: None,
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn test_index_and_postings() {
        let builder = IndexBuilder::new(tokenizer());
        builder
            .index_document(doc("1", "contract dispute", "breach of contract claims"))
            .unwrap();

        let generation = builder.current();
        assert_eq!(generation.version, 1);
        assert_eq!(generation.doc_count, 1);

        let postings = generation.postings("contract").unwrap();
        let stats = postings.get("1").unwrap();
        assert_eq!(stats.term_frequency, 2);
        assert!(stats.field_mask & Field::Title.mask_bit() != 0);
        assert!(stats.field_mask & Field::Content.mask_bit() != 0);
        // Every stored posting carries at least one occurrence
        assert!(stats.term_frequency >= 1);
    }

    #[test]
    fn test_update_replaces_old_postings() {
        let builder = IndexBuilder::new(tokenizer());
        builder
            .index_document(doc("1", "contract dispute", ""))
            .unwrap();
        builder
            .index_document(doc("1", "labor arbitration", ""))
            .unwrap();

        let generation = builder.current();
        assert_eq!(generation.version, 2);
        assert_eq!(generation.doc_count, 1);
        // No posting survives for a term absent after the update
        assert!(generation.postings("contract").is_none());
        assert!(generation.postings("labor").is_some());
    }

    #[test]
    fn test_remove_publishes_new_generation() {
        let builder = IndexBuilder::new(tokenizer());
        builder
            .index_document(doc("1", "contract dispute", ""))
            .unwrap();
        let old = builder.current();

        assert!(builder.remove_document("1").unwrap());
        assert!(!builder.remove_document("1").unwrap());

        let new = builder.current();
        assert!(new.version > old.version);
        assert!(!new.contains("1"));
        // In-flight readers on the old generation still observe the doc
        assert!(old.contains("1"));
        assert!(old.postings("contract").is_some());
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let builder = IndexBuilder::new(tokenizer());
        let err = builder.index_document(doc("1", "", "")).unwrap_err();
        assert!(matches!(err, SearchError::DocumentIndexingFailure { .. }));
        // Failed indexing publishes nothing
        assert_eq!(builder.current().version, 0);
    }

    #[test]
    fn test_reindex_all_swaps_once() {
        let builder = IndexBuilder::new(tokenizer());
        builder.index_document(doc("stale", "old content", "")).unwrap();

        let docs = vec![
            doc("1", "劳动合同纠纷", "").as_ref().clone(),
            doc("2", "合同审查模板", "").as_ref().clone(),
            doc("bad", "", "").as_ref().clone(),
        ];
        let report = builder.reindex_all(docs, &CancelToken::new()).unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, 1);

        let generation = builder.current();
        // Rebuilt from scratch: the stale doc is gone
        assert!(!generation.contains("stale"));
        assert_eq!(generation.doc_count, 2);
        assert_eq!(generation.doc_freq("合同"), 2);
    }

    #[test]
    fn test_reindex_cancellation_keeps_current() {
        let builder = IndexBuilder::new(tokenizer());
        builder.index_document(doc("keep", "contract law", "")).unwrap();
        let before = builder.current();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = builder
            .reindex_all(vec![doc("1", "new doc", "").as_ref().clone()], &cancel)
            .unwrap_err();
        assert!(matches!(err, SearchError::ReindexCancelled { .. }));
        assert_eq!(builder.current().version, before.version);
        assert!(builder.current().contains("keep"));
    }

    #[test]
    fn test_forward_entry_lengths() {
        let builder = IndexBuilder::new(tokenizer());
        builder
            .index_document(doc("1", "contract dispute", "breach damages claim"))
            .unwrap();

        let generation = builder.current();
        let entry = generation.forward("1").unwrap();
        assert_eq!(entry.doc_length, 5);
        assert_eq!(entry.field_lengths[&Field::Title], 2);
        assert_eq!(entry.field_lengths[&Field::Content], 3);
        assert_eq!(entry.term_vector["contract"], 1);
    }

    #[test]
    fn test_integrity_issues_empty_on_clean_index() {
        let builder = IndexBuilder::new(tokenizer());
        builder.index_document(doc("1", "contract", "")).unwrap();
        assert!(builder.current().integrity_issues().is_empty());
    }

    #[test]
    fn test_integrity_issues_reports_missing_forward_entry() {
        let builder = IndexBuilder::new(tokenizer());
        builder.index_document(doc("1", "contract dispute", "")).unwrap();
        builder.index_document(doc("2", "labor arbitration", "")).unwrap();

        builder.drop_forward_entry("1");

        let generation = builder.current();
        // Postings still name the doc while its forward entry is gone
        assert!(generation.postings("contract").is_some());
        assert!(generation.forward("1").is_none());
        assert_eq!(generation.integrity_issues(), vec!["1".to_string()]);
    }

    #[test]
    fn test_avg_doc_length() {
        let builder = IndexBuilder::new(tokenizer());
        builder.index_document(doc("1", "contract dispute", "")).unwrap();
        builder
            .index_document(doc("2", "labor arbitration procedure review", ""))
            .unwrap();
        let generation = builder.current();
        assert_eq!(generation.doc_count, 2);
        assert!((generation.avg_doc_length - 3.0).abs() < f64::EPSILON);
    }
}
