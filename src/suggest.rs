//! # Suggestion Engine Module
//!
//! ## Purpose
//! Autocomplete over the indexed vocabulary: exact prefix matches against the
//! generation's term dictionary ranked by document frequency, a bounded
//! edit-distance fallback when prefix matches run short, and document titles
//! as a distinct suggestion type.
//!
//! ## Input/Output Specification
//! - **Input**: Partial query prefix, result cap, current generation
//! - **Output**: Deduplicated suggestions with a coarse ranking score
//! - **Performance**: Prefix enumeration is an ordered range scan over the
//!   generation's fst term dictionary

use crate::config::SuggestConfig;
use crate::index::IndexGeneration;
use fst::{IntoStreamer, Streamer};
use serde::{Deserialize, Serialize};

/// Kind of suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    /// Indexed vocabulary term
    Term,
    /// Document title
    Title,
}

/// A single autocomplete candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    /// Coarse score for client-side ranking; document frequency for terms
    pub score: f64,
    #[serde(rename = "type")]
    pub kind: SuggestionType,
}

/// Prefix and edit-distance completion over a generation's vocabulary
pub struct SuggestionEngine {
    config: SuggestConfig,
}

impl SuggestionEngine {
    pub fn new(config: SuggestConfig) -> Self {
        Self { config }
    }

    /// Produce up to `limit` suggestions for a partial query
    pub fn suggest(
        &self,
        generation: &IndexGeneration,
        prefix: &str,
        limit: usize,
    ) -> Vec<Suggestion> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut suggestions = self.prefix_matches(generation, &prefix);

        // Fall back to fuzzy matching only when prefix matches run short
        if suggestions.len() < self.config.min_prefix_matches
            && self.config.max_edit_distance > 0
        {
            suggestions.extend(self.fuzzy_matches(generation, &prefix));
        }

        suggestions.extend(title_matches(generation, &prefix));

        // Dedup by text keeping the best score, then rank
        suggestions.sort_by(|a, b| {
            a.text
                .cmp(&b.text)
                .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
        });
        suggestions.dedup_by(|a, b| a.text == b.text);
        suggestions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.text.cmp(&b.text))
        });
        suggestions.truncate(limit);
        suggestions
    }

    /// Terms starting with the prefix, scored by document frequency
    fn prefix_matches(&self, generation: &IndexGeneration, prefix: &str) -> Vec<Suggestion> {
        let mut matches = Vec::new();
        let mut stream = generation.term_dict().range().ge(prefix).into_stream();
        while let Some(key) = stream.next() {
            let Ok(term) = std::str::from_utf8(key) else {
                continue;
            };
            if !term.starts_with(prefix) {
                break;
            }
            matches.push(Suggestion {
                text: term.to_string(),
                score: generation.doc_freq(term) as f64,
                kind: SuggestionType::Term,
            });
        }
        matches
    }

    /// Terms within the configured edit distance of the prefix, scored by
    /// document frequency damped by distance
    fn fuzzy_matches(&self, generation: &IndexGeneration, prefix: &str) -> Vec<Suggestion> {
        let max_distance = self.config.max_edit_distance;
        let mut matches = Vec::new();
        let mut stream = generation.term_dict().stream();
        while let Some(key) = stream.next() {
            let Ok(term) = std::str::from_utf8(key) else {
                continue;
            };
            if term.starts_with(prefix) {
                continue;
            }
            if let Some(distance) = bounded_levenshtein(prefix, term, max_distance) {
                matches.push(Suggestion {
                    text: term.to_string(),
                    score: generation.doc_freq(term) as f64 / (1.0 + distance as f64),
                    kind: SuggestionType::Term,
                });
            }
        }
        matches
    }

    /// Vocabulary terms within `max_distance` edits of `term`, for fuzzy
    /// query expansion of zero-hit terms
    pub fn expand_term(
        &self,
        generation: &IndexGeneration,
        term: &str,
        limit: usize,
    ) -> Vec<String> {
        let mut candidates: Vec<(u32, String)> = Vec::new();
        let mut stream = generation.term_dict().stream();
        while let Some(key) = stream.next() {
            let Ok(candidate) = std::str::from_utf8(key) else {
                continue;
            };
            if let Some(distance) =
                bounded_levenshtein(term, candidate, self.config.max_edit_distance)
            {
                if distance > 0 {
                    candidates.push((distance, candidate.to_string()));
                }
            }
        }
        candidates.sort();
        candidates
            .into_iter()
            .take(limit)
            .map(|(_, term)| term)
            .collect()
    }
}

/// Document titles starting with the prefix
fn title_matches(generation: &IndexGeneration, prefix: &str) -> Vec<Suggestion> {
    let mut matches: Vec<Suggestion> = generation
        .all_docs()
        .filter(|doc| doc.title.to_lowercase().starts_with(prefix))
        .map(|doc| Suggestion {
            text: doc.title.clone(),
            score: 1.0,
            kind: SuggestionType::Title,
        })
        .collect();
    matches.sort_by(|a, b| a.text.cmp(&b.text));
    matches
}

/// Levenshtein distance capped at `max`; `None` when the bound is exceeded.
/// The DP row carries an early-exit check so unrelated terms cost little.
fn bounded_levenshtein(a: &str, b: &str, max: u32) -> Option<u32> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max as usize {
        return None;
    }

    let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
    let mut current = vec![0u32; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i as u32 + 1;
        let mut row_min = current[0];
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (prev[j] + cost)
                .min(prev[j + 1] + 1)
                .min(current[j] + 1);
            row_min = row_min.min(current[j + 1]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut current);
    }

    let distance = prev[b.len()];
    (distance <= max).then_some(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::index::IndexBuilder;
    use crate::tokenizer::Tokenizer;
    use crate::{AccessLevel, EntityType, SearchDocument};
    use chrono::Utc;
    use std::sync::Arc;

    fn doc(id: &str, title: &str, content: &str) -> Arc<SearchDocument> {
        Arc::new(SearchDocument {
            id: id.to_string(),
            entity_id: id.to_string(),
            entity_type: EntityType::Article,
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            tags: Default::default(),
            categories: Default::default(),
            language: "en".to_string(),
            access_level: AccessLevel::Internal,
            author_id: None,
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    fn engine_and_builder() -> (SuggestionEngine, IndexBuilder) {
        let builder = IndexBuilder::new(Arc::new(Tokenizer::new(&TokenizerConfig::default())));
        builder
            .index_document(doc("1", "Arbitration basics", "arbitral tribunal procedure"))
            .unwrap();
        builder
            .index_document(doc("2", "Arbitration clauses", "arbitration agreement drafting"))
            .unwrap();
        builder
            .index_document(doc("3", "Contract review", "contract terms checklist"))
            .unwrap();
        (SuggestionEngine::new(SuggestConfig::default()), builder)
    }

    #[test]
    fn test_prefix_ranked_by_doc_freq() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        let suggestions = engine.suggest(&generation, "arbitr", 10);

        let terms: Vec<&Suggestion> = suggestions
            .iter()
            .filter(|s| s.kind == SuggestionType::Term)
            .collect();
        assert!(!terms.is_empty());
        // "arbitration" appears in both docs, "arbitral" in one
        assert_eq!(terms[0].text, "arbitration");
        assert!(terms[0].score >= 2.0);
    }

    #[test]
    fn test_title_suggestions_distinct_type() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        let suggestions = engine.suggest(&generation, "arbitration b", 10);
        assert!(suggestions
            .iter()
            .any(|s| s.kind == SuggestionType::Title && s.text == "Arbitration basics"));
    }

    #[test]
    fn test_fuzzy_fallback_on_typo() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        // "contrat" has no prefix matches; edit distance 1 from "contract"
        let suggestions = engine.suggest(&generation, "contrat", 10);
        assert!(suggestions.iter().any(|s| s.text == "contract"));
    }

    #[test]
    fn test_limit_and_dedup() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        let suggestions = engine.suggest(&generation, "a", 3);
        assert!(suggestions.len() <= 3);
        let mut texts: Vec<&str> = suggestions.iter().map(|s| s.text.as_str()).collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), suggestions.len());
    }

    #[test]
    fn test_empty_prefix_returns_nothing() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        assert!(engine.suggest(&generation, "   ", 10).is_empty());
    }

    #[test]
    fn test_expand_term_excludes_exact() {
        let (engine, builder) = engine_and_builder();
        let generation = builder.current();
        let variants = engine.expand_term(&generation, "contrct", 5);
        assert!(variants.contains(&"contract".to_string()));
        assert!(!variants.contains(&"contrct".to_string()));
    }

    #[test]
    fn test_bounded_levenshtein() {
        assert_eq!(bounded_levenshtein("contract", "contract", 2), Some(0));
        assert_eq!(bounded_levenshtein("contract", "contrat", 2), Some(1));
        assert_eq!(bounded_levenshtein("contract", "contracts", 2), Some(1));
        assert_eq!(bounded_levenshtein("contract", "tort", 2), None);
        assert_eq!(bounded_levenshtein("合同", "合同法", 2), Some(1));
    }
}
