//! # Knowledge-Base Search & Ranking Engine
//!
//! ## Overview
//! This library implements the search and ranking engine behind a law-firm
//! knowledge-base portal: mixed Chinese/Latin legal text is tokenized into an
//! inverted index, queried with structured filters, scored with a TF-IDF
//! field-boost formula, and served alongside facet counts, autocomplete
//! suggestions, and per-user content recommendations.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `tokenizer`: Normalization, CJK segmentation, stopword and stemming rules
//! - `store`: Read-through adapter over the external content store
//! - `index`: Inverted/forward index maintained as immutable generations
//! - `query`: Query parsing into term/phrase clauses and filter predicates
//! - `scorer`: TF-IDF relevance scoring with field boosts
//! - `facets`: Facet aggregation over the filtered candidate set
//! - `suggest`: Prefix and edit-distance autocomplete
//! - `recommend`: Interest-profile content recommendations
//! - `cache`: Generation-versioned query result cache
//! - `engine`: Facade wiring the read and write paths together
//!
//! ## Input/Output Specification
//! - **Input**: `SearchDocument` snapshots pushed by the content store;
//!   free-text queries with structured filters
//! - **Output**: Ranked results with facets, suggestions, recommendations
//! - **Performance**: Reads never block on writes; deterministic ranking
//!
//! ## Usage
//! ```rust,no_run
//! use kb_search::{QuerySpec, SearchEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SearchEngine::with_defaults()?;
//!     let results = engine.search(QuerySpec::from_query("劳动合同")).await?;
//!     println!("Found {} results", results.total);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod tokenizer;
pub mod store;
pub mod index;
pub mod query;
pub mod scorer;
pub mod facets;
pub mod suggest;
pub mod recommend;
pub mod cache;
pub mod engine;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use engine::{IndexOptions, IndexResult, SearchEngine, SearchResults};
pub use errors::{Result, SearchError};
pub use query::QuerySpec;
pub use store::DocumentSource;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Opaque document identifier supplied by the content store
pub type DocId = String;

/// Kind of entity a knowledge-base document represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Article,
    Document,
    Template,
    Case,
    User,
}

impl EntityType {
    /// Stable label used as a facet bucket value
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Article => "article",
            EntityType::Document => "document",
            EntityType::Template => "template",
            EntityType::Case => "case",
            EntityType::User => "user",
        }
    }
}

/// Visibility level of a document within the firm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Internal,
    Restricted,
    Confidential,
}

impl AccessLevel {
    /// Stable label used as a facet bucket value
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Internal => "internal",
            AccessLevel::Restricted => "restricted",
            AccessLevel::Confidential => "confidential",
        }
    }
}

/// Typed metadata value; replaces the content store's untyped metadata bag
/// so downstream consumers can pattern-match instead of shape-checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Nested(BTreeMap<String, MetadataValue>),
}

/// Indexed document field; determines analysis weight and posting field masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Content,
    Summary,
    Tags,
    Categories,
}

impl Field {
    /// Bit assigned to this field in posting field masks
    pub fn mask_bit(&self) -> u8 {
        match self {
            Field::Title => 1 << 0,
            Field::Content => 1 << 1,
            Field::Summary => 1 << 2,
            Field::Tags => 1 << 3,
            Field::Categories => 1 << 4,
        }
    }

    /// All indexed fields in analysis order
    pub fn all() -> [Field; 5] {
        [
            Field::Title,
            Field::Content,
            Field::Summary,
            Field::Tags,
            Field::Categories,
        ]
    }
}

/// Canonical document snapshot consumed from the content store.
/// Immutable once indexed into a generation; updates publish a new
/// generation rather than mutating postings in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Opaque unique identifier
    pub id: DocId,
    /// Identifier of the underlying entity in the content store
    pub entity_id: String,
    /// Entity kind
    pub entity_type: EntityType,
    /// Document title
    pub title: String,
    /// Full body text
    pub content: String,
    /// Optional abstract/summary
    pub summary: Option<String>,
    /// Free-form tags
    pub tags: BTreeSet<String>,
    /// Categorization within the knowledge base
    pub categories: BTreeSet<String>,
    /// Language hint for the tokenizer ("zh", "en", "mixed")
    pub language: String,
    /// Visibility level
    pub access_level: AccessLevel,
    /// Author, when known; recommendations exclude a user's own documents
    pub author_id: Option<String>,
    /// Typed metadata bag
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp; scoring tie-break key
    pub updated_at: DateTime<Utc>,
}

/// Clock seam so tests can control time-dependent behavior
/// (cache TTLs, recommendation decay)
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;
