//! # Recommendation Engine Module
//!
//! ## Purpose
//! Builds a per-user interest vector from recent view history and scores
//! unseen documents by cosine similarity against forward-index term vectors.
//! Users with no history fall back to a global popularity ranking instead of
//! failing.
//!
//! ## Input/Output Specification
//! - **Input**: View interactions `(user, doc)`, the current generation,
//!   an optional currently-viewed document to exclude
//! - **Output**: Top-N documents by similarity, ties broken by view count
//!   descending
//! - **Scoping**: The interest profile is a lazily rebuilt, read-only
//!   derived cache; nothing here is persisted
//!
//! ## Key Features
//! - Exponential recency decay (configurable half-life)
//! - Category/tag overlap pre-filter bounding the candidate set before the
//!   full vector comparison
//! - Excludes the current document and anything the user authored

use crate::config::RecommendConfig;
use crate::index::IndexGeneration;
use crate::{Clock, DocId, SearchDocument};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// One recorded view interaction
#[derive(Debug, Clone)]
struct Interaction {
    doc_id: DocId,
    at: DateTime<Utc>,
}

/// Per-user interest vector derived from interaction history
#[derive(Debug, Default)]
pub struct UserInterestProfile {
    /// Term or category pseudo-term → decayed weight
    weights: HashMap<String, f64>,
    /// Categories and tags seen in the user's history, for candidate
    /// pre-filtering
    overlap_keys: BTreeSet<String>,
    /// Documents already viewed
    seen: BTreeSet<DocId>,
}

impl UserInterestProfile {
    /// Whether the profile carries any signal
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Category pseudo-term prefix keeping category weights distinct from
/// vocabulary terms in the interest vector
const CATEGORY_KEY: &str = "category:";

/// Content recommendations from view history
pub struct RecommendationEngine {
    config: RecommendConfig,
    clock: Arc<dyn Clock>,
    /// Recent interactions per user, newest at the back
    history: DashMap<String, VecDeque<Interaction>>,
    /// Global view counts per document
    view_counts: DashMap<DocId, u64>,
}

impl RecommendationEngine {
    pub fn new(config: RecommendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: DashMap::new(),
            view_counts: DashMap::new(),
        }
    }

    /// Record a view interaction fed from the analytics collaborator
    pub fn record_view(&self, user_id: &str, doc_id: &str) {
        let now = self.clock.now();
        let mut entry = self.history.entry(user_id.to_string()).or_default();
        entry.push_back(Interaction {
            doc_id: doc_id.to_string(),
            at: now,
        });
        while entry.len() > self.config.max_history {
            entry.pop_front();
        }
        *self.view_counts.entry(doc_id.to_string()).or_insert(0) += 1;
    }

    /// Total recorded views for a document
    pub fn view_count(&self, doc_id: &str) -> u64 {
        self.view_counts.get(doc_id).map_or(0, |c| *c)
    }

    /// Top-N recommendations for a user. Never includes the currently
    /// viewed document or documents the user authored.
    pub fn recommend(
        &self,
        generation: &IndexGeneration,
        user_id: &str,
        current_doc: Option<&str>,
        limit: usize,
    ) -> Vec<Arc<SearchDocument>> {
        if limit == 0 {
            return Vec::new();
        }
        let profile = self.build_profile(generation, user_id);
        if profile.is_empty() {
            tracing::debug!(user_id, "no interaction history, using popularity fallback");
            return self.popularity_fallback(generation, user_id, current_doc, limit);
        }

        let profile_norm = vector_norm(&profile.weights);
        let mut scored: Vec<(f64, u64, Arc<SearchDocument>)> = Vec::new();

        for doc in generation.all_docs() {
            if Some(doc.id.as_str()) == current_doc || profile.seen.contains(&doc.id) {
                continue;
            }
            if doc.author_id.as_deref() == Some(user_id) {
                continue;
            }
            // First-pass filter: require category/tag overlap with the
            // user's history before paying for the vector comparison
            let overlaps = doc
                .categories
                .iter()
                .chain(doc.tags.iter())
                .any(|key| profile.overlap_keys.contains(key));
            if !overlaps {
                continue;
            }
            let Some(forward) = generation.forward(&doc.id) else {
                continue;
            };

            let candidate = candidate_vector(doc, forward.term_vector.iter());
            let similarity = cosine(&profile.weights, profile_norm, &candidate);
            if similarity > 0.0 {
                scored.push((similarity, self.view_count(&doc.id), doc.clone()));
            }
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(a.2.id.cmp(&b.2.id))
        });
        scored.into_iter().take(limit).map(|(_, _, doc)| doc).collect()
    }

    /// Rebuild the interest profile from recent history against the given
    /// generation
    fn build_profile(&self, generation: &IndexGeneration, user_id: &str) -> UserInterestProfile {
        let mut profile = UserInterestProfile::default();
        let Some(history) = self.history.get(user_id) else {
            return profile;
        };
        let now = self.clock.now();

        for interaction in history.iter() {
            profile.seen.insert(interaction.doc_id.clone());
            let Some(doc) = generation.doc(&interaction.doc_id) else {
                continue;
            };
            let Some(forward) = generation.forward(&interaction.doc_id) else {
                continue;
            };

            let age_days =
                (now - interaction.at).num_seconds().max(0) as f64 / 86_400.0;
            let decay = 0.5_f64.powf(age_days / self.config.half_life_days);

            for (term, freq) in &forward.term_vector {
                *profile.weights.entry(term.clone()).or_insert(0.0) +=
                    decay * *freq as f64 / forward.doc_length as f64;
            }
            for category in &doc.categories {
                *profile
                    .weights
                    .entry(format!("{}{}", CATEGORY_KEY, category))
                    .or_insert(0.0) += decay;
                profile.overlap_keys.insert(category.clone());
            }
            for tag in &doc.tags {
                profile.overlap_keys.insert(tag.clone());
            }
        }
        profile
    }

    /// Global popularity ranking for users without history
    fn popularity_fallback(
        &self,
        generation: &IndexGeneration,
        user_id: &str,
        current_doc: Option<&str>,
        limit: usize,
    ) -> Vec<Arc<SearchDocument>> {
        let mut docs: Vec<(u64, Arc<SearchDocument>)> = generation
            .all_docs()
            .filter(|doc| Some(doc.id.as_str()) != current_doc)
            .filter(|doc| doc.author_id.as_deref() != Some(user_id))
            .map(|doc| (self.view_count(&doc.id), doc.clone()))
            .collect();
        docs.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.updated_at.cmp(&a.1.updated_at))
                .then(a.1.id.cmp(&b.1.id))
        });
        docs.into_iter().take(limit).map(|(_, doc)| doc).collect()
    }
}

/// Candidate document vector: term frequencies plus category pseudo-terms
fn candidate_vector<'a>(
    doc: &SearchDocument,
    term_vector: impl Iterator<Item = (&'a String, &'a u32)>,
) -> HashMap<String, f64> {
    let mut vector: HashMap<String, f64> =
        term_vector.map(|(t, f)| (t.clone(), *f as f64)).collect();
    for category in &doc.categories {
        vector.insert(format!("{}{}", CATEGORY_KEY, category), 1.0);
    }
    vector
}

fn vector_norm(v: &HashMap<String, f64>) -> f64 {
    v.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Cosine similarity between the profile and a candidate vector
fn cosine(profile: &HashMap<String, f64>, profile_norm: f64, candidate: &HashMap<String, f64>) -> f64 {
    if profile_norm == 0.0 {
        return 0.0;
    }
    let candidate_norm = vector_norm(candidate);
    if candidate_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = candidate
        .iter()
        .filter_map(|(key, weight)| profile.get(key).map(|p| p * weight))
        .sum();
    dot / (profile_norm * candidate_norm)
}
