//! # Facet Aggregator Module
//!
//! ## Purpose
//! Computes per-dimension bucket counts over the filtered, pre-pagination
//! candidate set. Counts answer "how many results would exist if I also
//! applied this facet value", so each dimension is counted against the
//! candidate set filtered by every dimension EXCEPT itself — a facet never
//! filters its own alternatives down to zero.
//!
//! ## Input/Output Specification
//! - **Input**: Scored candidates (pre-filter), the validated predicate,
//!   and the generation the candidates came from
//! - **Output**: `dimension → [{value, count}]`, buckets ordered by count
//!   descending then value ascending
//!
//! ## Dimensions
//! Entity type, category, tag, access level, and calendar-year date buckets
//! derived from `updated_at`.

use crate::index::IndexGeneration;
use crate::query::{Dimension, FilterPredicate};
use crate::scorer::ScoredDoc;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One facet bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetBucket {
    pub value: String,
    pub count: usize,
}

/// Facet counts keyed by dimension name
pub type Facets = BTreeMap<String, Vec<FacetBucket>>;

/// Name of the synthetic date-bucket dimension
pub const DATE_DIMENSION: &str = "date";

/// Computes facet counts over candidate sets
pub struct FacetAggregator;

impl FacetAggregator {
    /// Aggregate every supported dimension.
    ///
    /// `candidates` is the text-matched candidate set before structured
    /// filtering; the exclude-self predicate is applied per dimension here.
    pub fn aggregate(
        generation: &IndexGeneration,
        predicate: &FilterPredicate,
        candidates: &[ScoredDoc],
    ) -> Facets {
        let mut facets = Facets::new();

        for dimension in [
            Dimension::Type,
            Dimension::Category,
            Dimension::Tag,
            Dimension::AccessLevel,
        ] {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for candidate in candidates {
                let Some(doc) = generation.doc(&candidate.doc_id) else {
                    continue;
                };
                let Some(forward) = generation.forward(&candidate.doc_id) else {
                    continue;
                };
                if !predicate.matches_excluding(doc, forward, Some(dimension)) {
                    continue;
                }
                for value in dimension.values_of(doc) {
                    *counts.entry(value).or_insert(0) += 1;
                }
            }
            facets.insert(dimension.as_str().to_string(), into_buckets(counts));
        }

        // Date buckets: exclude the date-range filter from its own counts
        let mut date_predicate = predicate.clone();
        date_predicate.date_from = None;
        date_predicate.date_to = None;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for candidate in candidates {
            let Some(doc) = generation.doc(&candidate.doc_id) else {
                continue;
            };
            let Some(forward) = generation.forward(&candidate.doc_id) else {
                continue;
            };
            if !date_predicate.matches(doc, forward) {
                continue;
            }
            *counts.entry(doc.updated_at.year().to_string()).or_insert(0) += 1;
        }
        facets.insert(DATE_DIMENSION.to_string(), into_buckets(counts));

        facets
    }
}

/// Order buckets by count descending, then value ascending
fn into_buckets(counts: BTreeMap<String, usize>) -> Vec<FacetBucket> {
    let mut buckets: Vec<FacetBucket> = counts
        .into_iter()
        .map(|(value, count)| FacetBucket { value, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then(a.value.cmp(&b.value)));
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::index::IndexBuilder;
    use crate::tokenizer::Tokenizer;
    use crate::{AccessLevel, EntityType, SearchDocument};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn doc(id: &str, entity_type: EntityType, category: &str, year: i32) -> SearchDocument {
        let ts = Utc.with_ymd_and_hms(year, 3, 1, 0, 0, 0).unwrap();
        SearchDocument {
            id: id.to_string(),
            entity_id: id.to_string(),
            entity_type,
            title: format!("contract {}", id),
            content: String::new(),
            summary: None,
            tags: BTreeSet::new(),
            categories: [category.to_string()].into(),
            language: "en".to_string(),
            access_level: AccessLevel::Internal,
            author_id: None,
            metadata: Default::default(),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn candidates(builder: &IndexBuilder) -> Vec<ScoredDoc> {
        builder
            .current()
            .all_docs()
            .map(|d| ScoredDoc {
                doc_id: d.id.clone(),
                score: 1.0,
                matched_terms: vec![],
                updated_at: d.updated_at,
            })
            .collect()
    }

    fn builder_with_docs() -> IndexBuilder {
        let builder = IndexBuilder::new(Arc::new(Tokenizer::new(&TokenizerConfig::default())));
        builder
            .index_document(Arc::new(doc("1", EntityType::Article, "labor", 2023)))
            .unwrap();
        builder
            .index_document(Arc::new(doc("2", EntityType::Template, "template", 2024)))
            .unwrap();
        builder
            .index_document(Arc::new(doc("3", EntityType::Article, "labor", 2024)))
            .unwrap();
        builder
    }

    #[test]
    fn test_unfiltered_counts() {
        let builder = builder_with_docs();
        let generation = builder.current();
        let facets = FacetAggregator::aggregate(
            &generation,
            &FilterPredicate::default(),
            &candidates(&builder),
        );

        let categories = &facets["category"];
        assert_eq!(
            categories[0],
            FacetBucket {
                value: "labor".to_string(),
                count: 2
            }
        );
        assert_eq!(
            categories[1],
            FacetBucket {
                value: "template".to_string(),
                count: 1
            }
        );
        let types = &facets["type"];
        assert_eq!(types[0].value, "article");
        assert_eq!(types[0].count, 2);
    }

    #[test]
    fn test_dimension_does_not_filter_itself() {
        let builder = builder_with_docs();
        let generation = builder.current();
        let mut predicate = FilterPredicate::default();
        predicate
            .dimensions
            .insert(Dimension::Category, ["labor".to_string()].into());

        let facets =
            FacetAggregator::aggregate(&generation, &predicate, &candidates(&builder));

        // The category facet ignores the category filter, so the
        // "template" alternative stays visible
        let categories = &facets["category"];
        assert!(categories
            .iter()
            .any(|b| b.value == "template" && b.count == 1));

        // Other dimensions do apply the category filter
        let types = &facets["type"];
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].value, "article");
        assert_eq!(types[0].count, 2);
    }

    #[test]
    fn test_counts_sum_to_filtered_candidate_set() {
        let builder = builder_with_docs();
        let generation = builder.current();
        let mut predicate = FilterPredicate::default();
        predicate
            .dimensions
            .insert(Dimension::Type, ["article".to_string()].into());

        let facets =
            FacetAggregator::aggregate(&generation, &predicate, &candidates(&builder));

        // Single-valued dimension: bucket counts sum to the size of the
        // candidate set filtered by every dimension except itself
        let type_total: usize = facets["type"].iter().map(|b| b.count).sum();
        assert_eq!(type_total, 3);
        let category_total: usize = facets["category"].iter().map(|b| b.count).sum();
        assert_eq!(category_total, 2);
    }

    #[test]
    fn test_date_buckets_by_year() {
        let builder = builder_with_docs();
        let generation = builder.current();
        let facets = FacetAggregator::aggregate(
            &generation,
            &FilterPredicate::default(),
            &candidates(&builder),
        );
        let dates = &facets[DATE_DIMENSION];
        assert_eq!(
            dates[0],
            FacetBucket {
                value: "2024".to_string(),
                count: 2
            }
        );
    }
}
