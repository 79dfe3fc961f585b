//! Storage error types for tracegraph-storage.
//!
//! [`StorageError`] covers file loading, malformed documents and the two
//! fatal query conditions: unsupported operators and ambiguous single-result
//! lookups.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by annotation storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading an annotation file failed.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A loaded document lacks its primary key or is not an object.
    #[error("invalid annotation document: {reason}")]
    InvalidDocument { reason: String },

    /// A query used an operator outside the supported subset.
    #[error("unsupported query operator: '{operator}'")]
    UnsupportedOperator { operator: String },

    /// A query was structurally malformed.
    #[error("malformed query: {reason}")]
    MalformedQuery { reason: String },

    /// A single-result lookup matched more than one document.
    #[error("query {query} matched {matches} documents")]
    AmbiguousQuery { query: String, matches: usize },
}
