//! # Scorer and Ranker Module
//!
//! ## Purpose
//! Computes relevance scores over candidate postings with a TF-IDF formula
//! weighted by field boosts and damped by document-length normalization, then
//! ranks candidates deterministically.
//!
//! ## Scoring Formula
//! ```text
//! score(doc, query) = Σ_term tf(term,doc) · idf(term) · fieldBoost(term,doc) / lengthNorm(doc)
//! idf(term)         = ln(1 + totalDocs / (1 + docFreq(term)))
//! lengthNorm(doc)   = 1 + k · (docLength / avgDocLength − 1)
//! ```
//! Phrase clauses contribute their constituent term scores multiplied by a
//! configured adjacency bonus (> 1). Ties break by `updated_at` descending,
//! then `doc_id` ascending, making rankings fully deterministic.

use crate::config::ScoringConfig;
use crate::index::{IndexGeneration, PostingStats};
use crate::query::{Clause, PhraseTerm, QueryPlan, SortField, SortOrder};
use crate::{DocId, Field};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A candidate document with its computed relevance score
#[derive(Debug, Clone)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
    /// Terms that matched, for highlight generation
    pub matched_terms: Vec<String>,
    /// Tie-break key
    pub updated_at: DateTime<Utc>,
}

/// Result of candidate scoring
#[derive(Debug, Default)]
pub struct ScoreOutcome {
    /// Documents matching every text clause with score ≥ min_score,
    /// before structured filtering
    pub candidates: Vec<ScoredDoc>,
    /// Documents referenced by postings but missing forward entries;
    /// reported for isolated background repair
    pub inconsistencies: Vec<DocId>,
}

/// TF-IDF scorer over an immutable generation
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score every document matching the plan's text clauses.
    ///
    /// Browse plans (no clauses) return every indexed document with a zero
    /// relevance score; structured filters are applied downstream.
    pub fn score_candidates(
        &self,
        generation: &IndexGeneration,
        plan: &QueryPlan,
    ) -> ScoreOutcome {
        let mut outcome = ScoreOutcome::default();

        if plan.is_browse() {
            outcome.candidates = generation
                .all_docs()
                .map(|doc| ScoredDoc {
                    doc_id: doc.id.clone(),
                    score: 0.0,
                    matched_terms: Vec::new(),
                    updated_at: doc.updated_at,
                })
                .collect();
            return outcome;
        }

        // Per-document running score; a doc must survive every clause
        let mut scores: BTreeMap<DocId, (f64, Vec<String>)> = BTreeMap::new();
        let mut first = true;

        for clause in &plan.clauses {
            let clause_scores = match clause {
                Clause::Term { variants } => self.score_term_clause(generation, variants),
                Clause::Phrase { terms } => self.score_phrase_clause(generation, terms),
            };

            if first {
                scores = clause_scores;
                first = false;
            } else {
                // AND semantics: intersect with this clause's matches
                scores = scores
                    .into_iter()
                    .filter_map(|(doc_id, (score, mut terms))| {
                        clause_scores.get(&doc_id).map(|(extra, extra_terms)| {
                            terms.extend(extra_terms.iter().cloned());
                            (doc_id, (score + extra, terms))
                        })
                    })
                    .collect();
            }
            if scores.is_empty() {
                break;
            }
        }

        for (doc_id, (raw_score, mut matched_terms)) in scores {
            let Some(forward) = generation.forward(&doc_id) else {
                tracing::warn!(doc_id = %doc_id, "posting references missing forward entry");
                outcome.inconsistencies.push(doc_id);
                continue;
            };
            let norm = self.length_norm(forward.doc_length, generation.avg_doc_length);
            let score = raw_score / norm;
            if score < plan.min_score {
                continue;
            }
            let Some(doc) = generation.doc(&doc_id) else {
                outcome.inconsistencies.push(doc_id);
                continue;
            };
            matched_terms.sort();
            matched_terms.dedup();
            outcome.candidates.push(ScoredDoc {
                doc_id,
                score,
                matched_terms,
                updated_at: doc.updated_at,
            });
        }

        outcome
    }

    /// Sort candidates by the plan's sort spec and truncate to max_results.
    /// Relevance sorting is score-descending with deterministic tie-breaks.
    pub fn rank(
        &self,
        mut candidates: Vec<ScoredDoc>,
        plan: &QueryPlan,
        generation: &IndexGeneration,
    ) -> Vec<ScoredDoc> {
        match plan.sort.field {
            SortField::Relevance => {
                candidates.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.updated_at.cmp(&a.updated_at))
                        .then(a.doc_id.cmp(&b.doc_id))
                });
                if plan.sort.order == SortOrder::Asc {
                    candidates.reverse();
                }
            }
            SortField::UpdatedAt => {
                candidates.sort_by(|a, b| {
                    order(plan.sort.order, a.updated_at.cmp(&b.updated_at))
                        .then(a.doc_id.cmp(&b.doc_id))
                });
            }
            SortField::CreatedAt => {
                candidates.sort_by(|a, b| {
                    let ca = generation.doc(&a.doc_id).map(|d| d.created_at);
                    let cb = generation.doc(&b.doc_id).map(|d| d.created_at);
                    order(plan.sort.order, ca.cmp(&cb)).then(a.doc_id.cmp(&b.doc_id))
                });
            }
            SortField::Title => {
                candidates.sort_by(|a, b| {
                    let ta = generation.doc(&a.doc_id).map(|d| d.title.clone());
                    let tb = generation.doc(&b.doc_id).map(|d| d.title.clone());
                    order(plan.sort.order, ta.cmp(&tb)).then(a.doc_id.cmp(&b.doc_id))
                });
            }
        }
        candidates.truncate(plan.max_results);
        candidates
    }

    /// Sum of variant scores for every document containing any variant
    fn score_term_clause(
        &self,
        generation: &IndexGeneration,
        variants: &[String],
    ) -> BTreeMap<DocId, (f64, Vec<String>)> {
        let mut scores: BTreeMap<DocId, (f64, Vec<String>)> = BTreeMap::new();
        for term in variants {
            let Some(postings) = generation.postings(term) else {
                continue;
            };
            let idf = self.idf(generation.doc_count, postings.len());
            for (doc_id, stats) in postings {
                let contribution =
                    stats.term_frequency as f64 * idf * self.field_boost(stats.field_mask);
                let entry = scores.entry(doc_id.clone()).or_insert((0.0, Vec::new()));
                entry.0 += contribution;
                entry.1.push(term.clone());
            }
        }
        scores
    }

    /// Phrase clause: documents containing every term at its relative
    /// offset receive the summed term scores times the phrase bonus
    fn score_phrase_clause(
        &self,
        generation: &IndexGeneration,
        terms: &[PhraseTerm],
    ) -> BTreeMap<DocId, (f64, Vec<String>)> {
        let mut scores: BTreeMap<DocId, (f64, Vec<String>)> = BTreeMap::new();
        let Some(first_postings) = generation.postings(&terms[0].text) else {
            return scores;
        };

        'docs: for (doc_id, first_stats) in first_postings {
            let mut all_stats: Vec<&PostingStats> = vec![first_stats];
            for term in &terms[1..] {
                match generation.postings(&term.text).and_then(|p| p.get(doc_id)) {
                    Some(stats) => all_stats.push(stats),
                    None => continue 'docs,
                }
            }
            if !phrase_adjacent(terms, &all_stats) {
                continue;
            }

            let mut sum = 0.0;
            for (term, stats) in terms.iter().zip(&all_stats) {
                let idf = self.idf(generation.doc_count, generation.doc_freq(&term.text));
                sum += stats.term_frequency as f64 * idf * self.field_boost(stats.field_mask);
            }
            scores.insert(
                doc_id.clone(),
                (
                    sum * self.config.phrase_bonus,
                    terms.iter().map(|t| t.text.clone()).collect(),
                ),
            );
        }
        scores
    }

    fn idf(&self, total_docs: usize, doc_freq: usize) -> f64 {
        (1.0 + total_docs as f64 / (1.0 + doc_freq as f64)).ln()
    }

    /// Greatest boost among the fields the term occurred in
    fn field_boost(&self, field_mask: u8) -> f64 {
        let s = &self.config;
        let mut boost: f64 = 0.0;
        if field_mask & Field::Title.mask_bit() != 0 {
            boost = boost.max(s.title_boost);
        }
        if field_mask & Field::Summary.mask_bit() != 0 {
            boost = boost.max(s.summary_boost);
        }
        if field_mask & (Field::Tags.mask_bit() | Field::Categories.mask_bit()) != 0 {
            boost = boost.max(s.tag_boost);
        }
        if field_mask & Field::Content.mask_bit() != 0 {
            boost = boost.max(s.content_boost);
        }
        if boost == 0.0 {
            boost = s.content_boost;
        }
        boost
    }

    fn length_norm(&self, doc_length: u32, avg_doc_length: f64) -> f64 {
        if avg_doc_length <= 0.0 {
            return 1.0;
        }
        1.0 + self.config.length_norm_k * (doc_length as f64 / avg_doc_length - 1.0)
    }
}

fn order(sort: SortOrder, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
    match sort {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Whether some start position in the first term's postings anchors every
/// other term at its relative offset. Segmentation sub-words carry offset 0
/// and so must share the anchor position, mirroring how the index writer
/// emitted them.
fn phrase_adjacent(terms: &[PhraseTerm], stats: &[&PostingStats]) -> bool {
    stats[0].positions.iter().any(|&start| {
        terms[1..]
            .iter()
            .zip(&stats[1..])
            .all(|(term, s)| s.positions.binary_search(&(start + term.offset)).is_ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoringConfig, TokenizerConfig};
    use crate::index::IndexBuilder;
    use crate::query::{QueryParser, QuerySpec};
    use crate::tokenizer::Tokenizer;
    use crate::{AccessLevel, EntityType, SearchDocument};
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    fn doc(id: &str, title: &str, content: &str) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            entity_id: id.to_string(),
            entity_type: EntityType::Article,
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            tags: BTreeSet::new(),
            categories: BTreeSet::new(),
            language: "en".to_string(),
            access_level: AccessLevel::Internal,
            author_id: None,
            metadata: Default::default(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    struct Fixture {
        builder: IndexBuilder,
        parser: QueryParser,
        scorer: Scorer,
    }

    fn fixture() -> Fixture {
        let tokenizer = Arc::new(Tokenizer::new(&TokenizerConfig::default()));
        Fixture {
            builder: IndexBuilder::new(tokenizer.clone()),
            parser: QueryParser::new(tokenizer, &HashMap::new(), 1000),
            scorer: Scorer::new(ScoringConfig::default()),
        }
    }

    fn run(f: &Fixture, query: &str) -> Vec<ScoredDoc> {
        let plan = f.parser.parse(&QuerySpec::from_query(query)).unwrap();
        let generation = f.builder.current();
        let outcome = f.scorer.score_candidates(&generation, &plan);
        assert!(outcome.inconsistencies.is_empty());
        f.scorer.rank(outcome.candidates, &plan, &generation)
    }

    #[test]
    fn test_indexed_title_term_scores_positive() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("1", "arbitration clause", "")))
            .unwrap();
        let results = run(&f, "arbitration");
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_title_outranks_body_at_equal_length() {
        let f = fixture();
        // Same analyzed length; term in title of A, in body of B
        f.builder
            .index_document(Arc::new(doc("a", "arbitration guide", "steps overview")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("b", "process guide", "arbitration overview")))
            .unwrap();
        let results = run(&f, "arbitration");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, "a");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_and_semantics_across_terms() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("1", "labor dispute", "")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("2", "labor law", "")))
            .unwrap();
        let results = run(&f, "labor dispute");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "1");
    }

    #[test]
    fn test_phrase_requires_adjacency() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("adjacent", "", "labor arbitration procedure")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc(
                "scattered",
                "",
                "labor law requires formal arbitration",
            )))
            .unwrap();
        let results = run(&f, r#""labor arbitration""#);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "adjacent");
    }

    #[test]
    fn test_cjk_phrase_matches_verbatim_segmented_text() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc(
                "1",
                "劳动合同纠纷处理指南",
                "劳动合同纠纷的处理流程",
            )))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("2", "合同审查模板", "合同审查要点")))
            .unwrap();

        // The quoted form must match wherever the plain form does: the
        // sub-word "合同" shares its parent's position and may not break
        // the adjacency check
        let plain = run(&f, "劳动合同纠纷");
        let quoted = run(&f, r#""劳动合同纠纷""#);
        assert_eq!(plain.len(), 1);
        assert_eq!(quoted.len(), 1);
        assert_eq!(quoted[0].doc_id, "1");
    }

    #[test]
    fn test_phrase_bonus_exceeds_plain_terms() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("1", "", "labor arbitration procedure")))
            .unwrap();
        let phrase = run(&f, r#""labor arbitration""#);
        let plain = run(&f, "labor arbitration");
        assert_eq!(phrase.len(), 1);
        assert_eq!(plain.len(), 1);
        assert!(phrase[0].score > plain[0].score);
    }

    #[test]
    fn test_tie_breaks_by_recency_then_id() {
        let f = fixture();
        let mut older = doc("z-old", "contract review", "");
        older.updated_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut newer = doc("a-new", "contract review", "");
        newer.updated_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        f.builder.index_document(Arc::new(older)).unwrap();
        f.builder.index_document(Arc::new(newer)).unwrap();

        let results = run(&f, "contract");
        assert_eq!(results[0].doc_id, "a-new");

        // Equal recency falls back to doc id ascending
        let f2 = fixture();
        f2.builder
            .index_document(Arc::new(doc("b", "contract review", "")))
            .unwrap();
        f2.builder
            .index_document(Arc::new(doc("a", "contract review", "")))
            .unwrap();
        let results = run(&f2, "contract");
        assert_eq!(results[0].doc_id, "a");
    }

    #[test]
    fn test_min_score_excludes() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("1", "arbitration", "")))
            .unwrap();
        let mut spec = QuerySpec::from_query("arbitration");
        spec.options.min_score = f64::MAX;
        let plan = f.parser.parse(&spec).unwrap();
        let generation = f.builder.current();
        let outcome = f.scorer.score_candidates(&generation, &plan);
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn test_max_results_truncation() {
        let f = fixture();
        for i in 0..5 {
            f.builder
                .index_document(Arc::new(doc(&format!("d{}", i), "contract review", "")))
                .unwrap();
        }
        let mut spec = QuerySpec::from_query("contract");
        spec.options.max_results = Some(3);
        let plan = f.parser.parse(&spec).unwrap();
        let generation = f.builder.current();
        let outcome = f.scorer.score_candidates(&generation, &plan);
        let ranked = f.scorer.rank(outcome.candidates, &plan, &generation);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_browse_returns_all() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("1", "contract", "")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("2", "arbitration", "")))
            .unwrap();
        let mut spec = QuerySpec::from_query("");
        spec.filters
            .dimensions
            .insert("type".to_string(), ["article".to_string()].into());
        let plan = f.parser.parse(&spec).unwrap();
        let generation = f.builder.current();
        let outcome = f.scorer.score_candidates(&generation, &plan);
        assert_eq!(outcome.candidates.len(), 2);
    }

    #[test]
    fn test_rarer_term_weighs_more() {
        let f = fixture();
        f.builder
            .index_document(Arc::new(doc("common1", "contract review", "")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("common2", "contract drafting", "")))
            .unwrap();
        f.builder
            .index_document(Arc::new(doc("rare", "injunction request", "")))
            .unwrap();
        let rare = run(&f, "injunction");
        let common = run(&f, "contract");
        assert!(rare[0].score > common[0].score);
    }
}
