//! # Search Engine Module
//!
//! ## Purpose
//! Facade wiring the write path (store adapter → index builder) and the read
//! path (query parser → scorer → facet aggregator, wrapped by the query
//! cache) into the interface exposed to the API layer. The suggestion and
//! recommendation engines read the same generation snapshots independently
//! of the main query path.
//!
//! ## Input/Output Specification
//! - **Input**: Document index/remove notifications from the content store,
//!   query specs, suggestion prefixes, view interactions
//! - **Output**: Ranked results with facets and timing, suggestions,
//!   recommendations
//! - **Concurrency**: Reads operate on immutable generation snapshots and
//!   never block behind writers
//!
//! ## Key Features
//! - Cache-check → execute → cache-store query flow
//! - Fuzzy expansion of zero-hit query terms
//! - Isolated single-document repair on detected index inconsistency
//! - Cancellable maintenance scheduling for cache sweeps and integrity checks

use crate::cache::{cache_key, CacheStats, QueryCache};
use crate::config::Config;
use crate::errors::Result;
use crate::facets::{FacetAggregator, Facets};
use crate::index::{IndexBuilder, IndexGeneration, ReindexReport};
use crate::query::{Clause, QueryParser, QueryPlan, QuerySpec};
use crate::recommend::RecommendationEngine;
use crate::scorer::{ScoredDoc, Scorer};
use crate::store::{DocumentSource, MemorySource, StoreAdapter};
use crate::suggest::{Suggestion, SuggestionEngine};
use crate::tokenizer::Tokenizer;
use crate::utils::{CancelToken, TextUtils, Timer};
use crate::{Clock, DocId, EntityType, SearchDocument, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Per-call indexing options
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Drop any cached store snapshot for this document before indexing,
    /// forcing the next read-through to hit the content store
    pub refresh_snapshot: bool,
}

/// Outcome echo for a single `index()` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResult {
    pub success: bool,
    pub doc_id: DocId,
    pub index_time_ms: u64,
    pub error: Option<String>,
}

/// One ranked hit with denormalized display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    pub title: String,
    pub summary: Option<String>,
    pub entity_type: EntityType,
    /// Snippet fragments around matched terms
    pub highlights: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Materialized response for one search call; also the cached payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
    /// Candidate count after filtering and truncation, before pagination
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub facets: Facets,
    /// "Did you mean" suggestions, populated when nothing matched
    pub suggestions: Vec<Suggestion>,
    pub took_ms: u64,
}

/// Engine-wide statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub doc_count: usize,
    pub generation_version: u64,
    pub avg_doc_length: f64,
    pub cached_snapshots: usize,
    pub cache: CacheStats,
}

/// Handle to a running maintenance loop; dropping it without calling
/// [`MaintenanceHandle::shutdown`] aborts the loop on the next tick
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Main search engine
pub struct SearchEngine {
    config: Arc<Config>,
    store: Arc<StoreAdapter>,
    index: Arc<IndexBuilder>,
    parser: QueryParser,
    scorer: Scorer,
    suggester: SuggestionEngine,
    recommender: RecommendationEngine,
    cache: QueryCache<SearchResults>,
}

impl SearchEngine {
    /// Create an engine with injected collaborators
    pub fn new(
        config: Config,
        source: Arc<dyn DocumentSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let tokenizer = Arc::new(Tokenizer::new(&config.tokenizer));
        let parser = QueryParser::new(
            tokenizer.clone(),
            &config.synonyms,
            config.scoring.default_max_results,
        );

        Ok(Self {
            store: Arc::new(StoreAdapter::new(source)),
            index: Arc::new(IndexBuilder::new(tokenizer)),
            parser,
            scorer: Scorer::new(config.scoring.clone()),
            suggester: SuggestionEngine::new(config.suggest.clone()),
            recommender: RecommendationEngine::new(config.recommend.clone(), clock.clone()),
            cache: QueryCache::new(config.cache.clone(), clock),
            config,
        })
    }

    /// Engine with default configuration, an in-memory source, and the
    /// system clock
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Config::default(),
            Arc::new(MemorySource::new()),
            Arc::new(SystemClock),
        )
    }

    /// Index or re-index one document pushed from the content store.
    /// Failures are echoed in the result, not raised; the previously
    /// published generation keeps serving reads.
    pub async fn index(&self, doc: SearchDocument, opts: IndexOptions) -> IndexResult {
        let timer = Timer::new("index");
        let doc_id = doc.id.clone();
        if opts.refresh_snapshot {
            self.store.invalidate(&doc_id);
        }
        let snapshot = self.store.put(doc);

        match self.index.index_document(snapshot) {
            Ok(()) => IndexResult {
                success: true,
                doc_id,
                index_time_ms: timer.stop(),
                error: None,
            },
            Err(err) => {
                tracing::warn!(doc_id = %doc_id, error = %err, "indexing failed");
                IndexResult {
                    success: false,
                    doc_id,
                    index_time_ms: timer.stop(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Remove a document; returns false when it was not indexed
    pub async fn remove(&self, doc_id: &str) -> Result<bool> {
        self.store.invalidate(doc_id);
        self.index.remove_document(doc_id)
    }

    /// Rebuild the whole index from the given documents without blocking
    /// readers; the cancellation token is honored between batches
    pub async fn reindex_all(
        &self,
        docs: impl IntoIterator<Item = SearchDocument>,
        cancel: CancelToken,
    ) -> Result<ReindexReport> {
        let docs: Vec<SearchDocument> = docs.into_iter().collect();
        let index = self.index.clone();
        let report = tokio::task::spawn_blocking(move || index.reindex_all(docs, &cancel))
            .await
            .map_err(|e| crate::internal_error!("reindex task failed: {}", e))??;
        Ok(report)
    }

    /// Execute a search, serving from the query cache when the cached
    /// entry's generation is still current
    pub async fn search(&self, spec: QuerySpec) -> Result<SearchResults> {
        let timer = Timer::new("search");
        let plan = self.parser.parse(&spec)?;
        let generation = self.index.current();

        let key = cache_key(&plan)?;
        if let Some(cached) = self.cache.get(key, generation.version) {
            tracing::debug!(version = generation.version, "query cache hit");
            return Ok(cached);
        }

        let plan = self.expand_fuzzy(plan, &generation);
        let outcome = self.scorer.score_candidates(&generation, &plan);
        if !outcome.inconsistencies.is_empty() {
            self.schedule_repair(outcome.inconsistencies.clone()).await;
        }

        // Facets see the text-matched candidates; the exclude-self
        // predicate is applied per dimension inside the aggregator
        let facets = FacetAggregator::aggregate(&generation, &plan.predicate, &outcome.candidates);

        let filtered: Vec<ScoredDoc> = outcome
            .candidates
            .into_iter()
            .filter(|c| {
                match (generation.doc(&c.doc_id), generation.forward(&c.doc_id)) {
                    (Some(doc), Some(forward)) => plan.predicate.matches(doc, forward),
                    _ => false,
                }
            })
            .collect();
        let ranked = self.scorer.rank(filtered, &plan, &generation);

        let total = ranked.len();
        let start = (plan.page - 1) * plan.limit;
        let page_docs = if start >= total {
            &ranked[0..0]
        } else {
            &ranked[start..(start + plan.limit).min(total)]
        };

        let results: Vec<SearchHit> = page_docs
            .iter()
            .filter_map(|scored| {
                generation.doc(&scored.doc_id).map(|doc| SearchHit {
                    doc_id: scored.doc_id.clone(),
                    score: scored.score,
                    title: doc.title.clone(),
                    summary: doc.summary.clone(),
                    entity_type: doc.entity_type,
                    highlights: build_highlights(doc, &scored.matched_terms),
                    updated_at: doc.updated_at,
                })
            })
            .collect();

        let suggestions = if total == 0 && !spec.query.trim().is_empty() {
            self.suggester.suggest(
                &generation,
                spec.query.trim(),
                self.config.suggest.default_limit,
            )
        } else {
            Vec::new()
        };

        let response = SearchResults {
            results,
            total,
            page: plan.page,
            limit: plan.limit,
            facets,
            suggestions,
            took_ms: timer.stop(),
        };
        self.cache.insert(key, response.clone(), generation.version);
        Ok(response)
    }

    /// Autocomplete for a partial query
    pub async fn suggest(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        self.suggester.suggest(&self.index.current(), prefix, limit)
    }

    /// Content recommendations for a user
    pub async fn recommend(
        &self,
        user_id: &str,
        current_doc: Option<&str>,
        limit: usize,
    ) -> Vec<SearchDocument> {
        self.recommender
            .recommend(&self.index.current(), user_id, current_doc, limit)
            .into_iter()
            .map(|doc| doc.as_ref().clone())
            .collect()
    }

    /// Record a view interaction feeding the recommendation engine
    pub fn record_view(&self, user_id: &str, doc_id: &str) {
        self.recommender.record_view(user_id, doc_id);
    }

    /// Engine statistics
    pub fn stats(&self) -> EngineStats {
        let generation = self.index.current();
        EngineStats {
            doc_count: generation.doc_count,
            generation_version: generation.version,
            avg_doc_length: generation.avg_doc_length,
            cached_snapshots: self.store.len(),
            cache: self.cache.stats(),
        }
    }

    /// Run periodic cache sweeps and index integrity checks until the
    /// returned handle is shut down
    pub fn spawn_maintenance(self: &Arc<Self>, every: Duration) -> MaintenanceHandle {
        let (stop, mut stopped) = watch::channel(false);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = engine.cache.sweep_expired();
                        if swept > 0 {
                            tracing::debug!(swept, "cache maintenance sweep");
                        }
                        let issues = engine.index.current().integrity_issues();
                        if !issues.is_empty() {
                            tracing::warn!(
                                count = issues.len(),
                                "maintenance detected inconsistent documents"
                            );
                            engine.schedule_repair(issues).await;
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        MaintenanceHandle { stop, task }
    }

    /// Expand term clauses whose variants all miss the vocabulary with
    /// near-spelled terms, bounded by the configured edit distance
    fn expand_fuzzy(&self, mut plan: QueryPlan, generation: &IndexGeneration) -> QueryPlan {
        if !plan.fuzzy {
            return plan;
        }
        for clause in &mut plan.clauses {
            if let Clause::Term { variants } = clause {
                if variants.iter().any(|v| generation.doc_freq(v) > 0) {
                    continue;
                }
                if let Some(term) = variants.first().cloned() {
                    let expanded = self.suggester.expand_term(generation, &term, 3);
                    if !expanded.is_empty() {
                        tracing::debug!(term = %term, ?expanded, "fuzzy-expanded zero-hit term");
                        variants.extend(expanded);
                    }
                }
            }
        }
        plan
    }

    /// Repair documents whose postings lost their forward entries by
    /// re-indexing each one in isolation
    async fn schedule_repair(&self, doc_ids: Vec<DocId>) {
        let store = self.store.clone();
        let index = self.index.clone();
        let repair = async move {
            for doc_id in doc_ids {
                tracing::warn!(doc_id = %doc_id, "repairing inconsistent document");
                match store.get(&doc_id).await {
                    Ok(Some(doc)) => {
                        if let Err(err) = index.index_document(doc) {
                            tracing::warn!(doc_id = %doc_id, error = %err, "repair failed");
                        }
                    }
                    Ok(None) => {
                        // Gone upstream; scrub the leftover postings
                        if let Err(err) = index.remove_document(&doc_id) {
                            tracing::warn!(doc_id = %doc_id, error = %err, "repair removal failed");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(doc_id = %doc_id, error = %err, "repair fetch failed");
                    }
                }
            }
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(repair);
        } else {
            repair.await;
        }
    }
}

/// Snippet fragments around the first occurrences of matched terms
fn build_highlights(doc: &SearchDocument, matched_terms: &[String]) -> Vec<String> {
    const MAX_FRAGMENTS: usize = 3;
    const RADIUS: usize = 40;

    let mut highlights = Vec::new();
    let title_lower = doc.title.to_lowercase();
    let content_lower = doc.content.to_lowercase();

    for term in matched_terms {
        if highlights.len() >= MAX_FRAGMENTS {
            break;
        }
        if title_lower.contains(term.as_str()) {
            highlights.push(TextUtils::truncate(&doc.title, RADIUS * 2));
            continue;
        }
        if let Some(offset) = content_lower.find(term.as_str()) {
            highlights.push(TextUtils::window_around(&doc.content, offset, RADIUS).to_string());
        }
    }
    highlights.dedup();
    highlights
}
