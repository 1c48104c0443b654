//! # Query Parser Module
//!
//! ## Purpose
//! Turns a caller's free-text query plus structured filters into an executable
//! query plan: required term clauses (AND semantics across distinct terms, OR
//! within a term's synonym group), phrase clauses requiring positional
//! adjacency, and a validated filter predicate tree.
//!
//! ## Input/Output Specification
//! - **Input**: [`QuerySpec`] (query text, filters, sort, pagination, options)
//! - **Output**: [`QueryPlan`] consumed by the scorer and facet aggregator
//! - **Errors**: `InvalidQuery` on malformed filters, unknown dimensions,
//!   or an empty query with no filters; never a silent ignore
//!
//! ## Key Features
//! - Quoted substrings become phrase clauses
//! - Query text runs through the same tokenizer as indexing
//! - Configurable synonym expansion into OR groups
//! - Filter-only browse when the query is empty but filters are present

use crate::errors::{Result, SearchError};
use crate::index::ForwardEntry;
use crate::tokenizer::{Token, Tokenizer};
use crate::{Field, SearchDocument};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Search request as received from the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Free-text query; may be empty when filters are present
    pub query: String,
    /// Structured filters
    pub filters: QueryFilters,
    /// Result ordering
    pub sort: SortSpec,
    /// Page selection
    pub pagination: Pagination,
    /// Execution options
    pub options: QueryOptions,
}

impl QuerySpec {
    /// Spec with just a query string and defaults everywhere else
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Structured filters; dimension values are matched as set membership
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilters {
    /// Categorical filters keyed by dimension name
    /// ("type", "category", "tag", "access_level")
    pub dimensions: BTreeMap<String, BTreeSet<String>>,
    /// Inclusive lower bound on `updated_at` (RFC 3339 or YYYY-MM-DD)
    pub date_from: Option<String>,
    /// Inclusive upper bound on `updated_at`
    pub date_to: Option<String>,
    /// Inclusive lower bound on analyzed document length
    pub size_min: Option<u32>,
    /// Inclusive upper bound on analyzed document length
    pub size_max: Option<u32>,
}

impl QueryFilters {
    /// Whether no filter is set at all
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.size_min.is_none()
            && self.size_max.is_none()
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

/// Sortable fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Relevance,
    UpdatedAt,
    CreatedAt,
    Title,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

/// Page selection; pages are 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// Execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Expand terms with no postings by bounded edit distance
    pub fuzzy: bool,
    /// Exclude results scoring below this threshold
    pub min_score: f64,
    /// Truncate the candidate set before pagination; None uses the
    /// configured default
    pub max_results: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            fuzzy: false,
            min_score: 0.0,
            max_results: None,
        }
    }
}

/// Filterable facet dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Type,
    Category,
    Tag,
    AccessLevel,
}

impl Dimension {
    /// Parse a caller-supplied dimension name
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "type" => Ok(Dimension::Type),
            "category" => Ok(Dimension::Category),
            "tag" => Ok(Dimension::Tag),
            "access_level" => Ok(Dimension::AccessLevel),
            other => Err(SearchError::InvalidQuery {
                reason: format!("unknown filter dimension '{}'", other),
            }),
        }
    }

    /// Stable name used in facet responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Type => "type",
            Dimension::Category => "category",
            Dimension::Tag => "tag",
            Dimension::AccessLevel => "access_level",
        }
    }

    /// A document's values along this dimension
    pub fn values_of(&self, doc: &SearchDocument) -> Vec<String> {
        match self {
            Dimension::Type => vec![doc.entity_type.as_str().to_string()],
            Dimension::Category => doc.categories.iter().cloned().collect(),
            Dimension::Tag => doc.tags.iter().cloned().collect(),
            Dimension::AccessLevel => vec![doc.access_level.as_str().to_string()],
        }
    }
}

/// Validated filter predicate tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    /// Membership constraints per dimension, AND'd across dimensions
    pub dimensions: BTreeMap<Dimension, BTreeSet<String>>,
    /// Inclusive `updated_at` range
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Inclusive analyzed-length range
    pub size_min: Option<u32>,
    pub size_max: Option<u32>,
}

impl FilterPredicate {
    /// Whether a document passes every filter
    pub fn matches(&self, doc: &SearchDocument, forward: &ForwardEntry) -> bool {
        self.matches_excluding(doc, forward, None)
    }

    /// Whether a document passes every filter except the given dimension.
    /// Facet counting uses this so a facet never filters itself to zero
    /// alternatives.
    pub fn matches_excluding(
        &self,
        doc: &SearchDocument,
        forward: &ForwardEntry,
        excluded: Option<Dimension>,
    ) -> bool {
        for (dimension, wanted) in &self.dimensions {
            if Some(*dimension) == excluded {
                continue;
            }
            let values = dimension.values_of(doc);
            if !values.iter().any(|v| wanted.contains(v)) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if doc.updated_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if doc.updated_at > to {
                return false;
            }
        }
        if let Some(min) = self.size_min {
            if forward.doc_length < min {
                return false;
            }
        }
        if let Some(max) = self.size_max {
            if forward.doc_length > max {
                return false;
            }
        }
        true
    }
}

/// One term of a phrase clause with its position relative to the phrase
/// start. Segmentation sub-words share their parent's offset, so a quoted
/// CJK phrase aligns against postings the same way the index writer emitted
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseTerm {
    pub text: String,
    pub offset: u32,
}

/// One required clause of a parsed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// Single term with its synonym variants; a document matches when any
    /// variant has a posting (OR within the group)
    Term { variants: Vec<String> },
    /// Terms requiring postings at matching relative offsets
    Phrase { terms: Vec<PhraseTerm> },
}

/// Executable query plan; also the canonical form hashed for the query cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Required clauses, AND semantics across clauses
    pub clauses: Vec<Clause>,
    /// Validated structured filters
    pub predicate: FilterPredicate,
    /// Result ordering
    pub sort: SortSpec,
    /// 1-based page
    pub page: usize,
    /// Page size
    pub limit: usize,
    /// Fuzzy expansion of zero-hit terms
    pub fuzzy: bool,
    /// Minimum score threshold
    pub min_score: f64,
    /// Candidate truncation bound
    pub max_results: usize,
}

impl QueryPlan {
    /// Whether the plan has no text clauses (filter-only browse)
    pub fn is_browse(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Parses caller specs into query plans
pub struct QueryParser {
    tokenizer: Arc<Tokenizer>,
    /// Normalized term → normalized synonym variants
    synonyms: HashMap<String, Vec<String>>,
    phrase_re: Regex,
    default_max_results: usize,
}

impl QueryParser {
    /// Build a parser sharing the index's tokenizer. Synonym entries are
    /// normalized through the same pipeline so they agree with postings.
    pub fn new(
        tokenizer: Arc<Tokenizer>,
        synonyms: &HashMap<String, Vec<String>>,
        default_max_results: usize,
    ) -> Self {
        let mut normalized: HashMap<String, Vec<String>> = HashMap::new();
        for (term, variants) in synonyms {
            let keys = tokenizer.analyze_terms(term);
            if keys.len() != 1 {
                continue;
            }
            let mut values: Vec<String> = variants
                .iter()
                .flat_map(|v| tokenizer.analyze_terms(v))
                .collect();
            values.sort();
            values.dedup();
            normalized.insert(keys.into_iter().next().expect("checked length"), values);
        }
        Self {
            tokenizer,
            synonyms: normalized,
            phrase_re: Regex::new(r#""([^"]+)""#).expect("static phrase pattern"),
            default_max_results,
        }
    }

    /// Parse and validate a spec into an executable plan
    pub fn parse(&self, spec: &QuerySpec) -> Result<QueryPlan> {
        let trimmed = spec.query.trim();
        if trimmed.is_empty() && spec.filters.is_empty() {
            return Err(SearchError::InvalidQuery {
                reason: "empty query with no filters".to_string(),
            });
        }
        if spec.pagination.page == 0 || spec.pagination.limit == 0 {
            return Err(SearchError::InvalidQuery {
                reason: "page and limit must be at least 1".to_string(),
            });
        }
        if spec.options.min_score < 0.0 {
            return Err(SearchError::InvalidQuery {
                reason: format!("min_score must be non-negative, got {}", spec.options.min_score),
            });
        }

        let mut clauses = Vec::new();

        // Quoted substrings become phrase clauses
        let mut remainder = String::with_capacity(trimmed.len());
        let mut last = 0;
        for captures in self.phrase_re.captures_iter(trimmed) {
            let whole = captures.get(0).expect("capture 0 always present");
            remainder.push_str(&trimmed[last..whole.start()]);
            remainder.push(' ');
            last = whole.end();

            let tokens = self
                .tokenizer
                .analyze(captures.get(1).expect("phrase capture").as_str(), Field::Content);
            if let Some(clause) = self.phrase_clause(tokens) {
                clauses.push(clause);
            }
        }
        remainder.push_str(&trimmed[last..]);

        for term in self.tokenizer.analyze_terms(&remainder) {
            clauses.push(self.term_clause(term));
        }

        let predicate = self.parse_filters(&spec.filters)?;

        Ok(QueryPlan {
            clauses,
            predicate,
            sort: spec.sort,
            page: spec.pagination.page,
            limit: spec.pagination.limit,
            fuzzy: spec.options.fuzzy,
            min_score: spec.options.min_score,
            max_results: spec
                .options
                .max_results
                .unwrap_or(self.default_max_results),
        })
    }

    /// Build a phrase clause from one quoted span's analyzed tokens.
    /// Offsets are positions relative to the phrase start; a span that
    /// analyzes to a single position degrades to a plain term clause.
    fn phrase_clause(&self, tokens: Vec<Token>) -> Option<Clause> {
        let first = tokens.first()?;
        let base = first.position;
        let spans_positions = tokens.iter().any(|t| t.position != base);
        if !spans_positions {
            return Some(self.term_clause(first.text.clone()));
        }
        let terms = tokens
            .into_iter()
            .map(|t| PhraseTerm {
                text: t.text,
                offset: t.position - base,
            })
            .collect();
        Some(Clause::Phrase { terms })
    }

    fn term_clause(&self, term: String) -> Clause {
        let mut variants = vec![term.clone()];
        if let Some(extra) = self.synonyms.get(&term) {
            variants.extend(extra.iter().cloned());
        }
        variants.dedup();
        Clause::Term { variants }
    }

    /// Validate structured filters into a predicate tree
    fn parse_filters(&self, filters: &QueryFilters) -> Result<FilterPredicate> {
        let mut dimensions = BTreeMap::new();
        for (name, values) in &filters.dimensions {
            let dimension = Dimension::parse(name)?;
            if values.is_empty() {
                return Err(SearchError::InvalidQuery {
                    reason: format!("filter dimension '{}' has no values", name),
                });
            }
            dimensions.insert(dimension, values.clone());
        }

        let date_from = filters
            .date_from
            .as_deref()
            .map(|s| parse_date(s, false))
            .transpose()?;
        let date_to = filters
            .date_to
            .as_deref()
            .map(|s| parse_date(s, true))
            .transpose()?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(SearchError::InvalidQuery {
                    reason: format!("date range is inverted: {} > {}", from, to),
                });
            }
        }
        if let (Some(min), Some(max)) = (filters.size_min, filters.size_max) {
            if min > max {
                return Err(SearchError::InvalidQuery {
                    reason: format!("size range is inverted: {} > {}", min, max),
                });
            }
        }

        Ok(FilterPredicate {
            dimensions,
            date_from,
            date_to,
            size_min: filters.size_min,
            size_max: filters.size_max,
        })
    }
}

/// Parse an RFC 3339 timestamp or bare date. Bare dates snap to the start
/// or end of the day depending on which bound they describe.
fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59).expect("valid time")
        } else {
            date.and_hms_opt(0, 0, 0).expect("valid time")
        };
        return Ok(time.and_utc());
    }
    Err(SearchError::InvalidQuery {
        reason: format!("unparsable date '{}'", value),
    })
}
