//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the knowledge-base search engine, providing
//! structured error types for every subsystem and conversion utilities for the
//! few external error sources the engine touches.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from tokenization, indexing, query parsing,
//!   caching, and configuration loading
//! - **Output**: Structured error types with context for logging and callers
//! - **Error Categories**: Query, Indexing, Tokenization, Configuration, Internal
//!
//! ## Key Features
//! - Struct variants with detailed context (doc ids, field names, reasons)
//! - Error categorization for structured logging
//! - Recoverability classification (a skipped document is not a failed batch)
//! - Automatic conversion from I/O, JSON, and TOML errors

use thiserror::Error;

/// Result type used throughout the engine
pub type Result<T> = std::result::Result<T, SearchError>;

/// Error types for the knowledge-base search engine
#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed query or filter, surfaced to the caller before execution
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Tokenization or field-extraction failure for a single document;
    /// the document is skipped and the surrounding batch continues
    #[error("failed to index document '{doc_id}': {reason}")]
    DocumentIndexingFailure { doc_id: String, reason: String },

    /// A posting references a document absent from the forward index;
    /// triggers an isolated single-document repair, never fatal to a query
    #[error("index inconsistency for document '{doc_id}': {details}")]
    IndexInconsistency { doc_id: String, details: String },

    /// Document lookup failed in the content store adapter
    #[error("document '{doc_id}' not found in content store")]
    DocumentNotFound { doc_id: String },

    /// A reindex was cancelled through its cancellation token
    #[error("reindex cancelled after {indexed} documents")]
    ReindexCancelled { indexed: usize },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Term dictionary construction failure
    #[error("term dictionary build failed: {reason}")]
    TermDictionary { reason: String },

    /// Internal invariant violations
    #[error("internal error: {message}")]
    Internal { message: String },

    /// I/O errors (configuration file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors (cache key canonicalization)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors (configuration files)
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SearchError {
    /// Whether the error aborts only the operation it occurred in,
    /// leaving the published index generation serving reads
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            SearchError::DocumentIndexingFailure { .. }
                | SearchError::IndexInconsistency { .. }
                | SearchError::ReindexCancelled { .. }
        )
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::InvalidQuery { .. } => "query",
            SearchError::DocumentIndexingFailure { .. }
            | SearchError::IndexInconsistency { .. }
            | SearchError::ReindexCancelled { .. }
            | SearchError::TermDictionary { .. } => "indexing",
            SearchError::DocumentNotFound { .. } => "store",
            SearchError::Config { .. } | SearchError::Toml(_) => "configuration",
            SearchError::Internal { .. }
            | SearchError::Io(_)
            | SearchError::Json(_) => "internal",
        }
    }
}

/// Helper macro for internal errors
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::SearchError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::SearchError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = SearchError::InvalidQuery {
            reason: "bad date".into(),
        };
        assert_eq!(err.category(), "query");

        let err = SearchError::DocumentIndexingFailure {
            doc_id: "d1".into(),
            reason: "empty".into(),
        };
        assert_eq!(err.category(), "indexing");
        assert!(err.is_isolated());
    }

    #[test]
    fn test_invalid_query_is_not_isolated() {
        let err = SearchError::InvalidQuery {
            reason: "unknown dimension".into(),
        };
        assert!(!err.is_isolated());
    }
}
