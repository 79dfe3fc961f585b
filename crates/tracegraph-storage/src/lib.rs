//! Annotation storage for tracegraph.
//!
//! Provides the [`AnnotationStore`] trait defining the annotation database
//! contract, the [`InMemoryAnnotationDb`] backend loading JSON annotation
//! files from a search path, and [`DbAnnotator`], which answers the builders'
//! annotation lookups from a store.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`query`]: document query language (equality, `$in`, `$or`, nesting)
//! - [`traits`]: AnnotationStore trait definition
//! - [`memory`]: InMemoryAnnotationDb implementation
//! - [`annotator`]: DbAnnotator with class-precedence resolution

pub mod annotator;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

// Re-export key types for ergonomic use.
pub use annotator::{AnnotatorConfig, DbAnnotator};
pub use error::StorageError;
pub use memory::InMemoryAnnotationDb;
pub use query::Query;
pub use traits::{AnnotationStore, Document};
