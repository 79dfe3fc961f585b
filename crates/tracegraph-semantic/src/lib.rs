//! Annotated and semantic flow graphs for tracegraph.
//!
//! The annotated builder simplifies a flat flow graph into a bipartite graph
//! of actions and entities carrying annotation keys. The semantic builder
//! then types every node by the ontology and names every action edge by the
//! aspect it fills.
//!
//! # Modules
//!
//! - [`error`]: AnnotateError, SemanticError and PipelineError
//! - [`annotated`]: AnnotatedGraphBuilder
//! - [`semantic`]: SemanticGraphBuilder
//! - [`pipeline`]: Pipeline running a trace through every stage

pub mod annotated;
pub mod error;
pub mod pipeline;
pub mod semantic;

// Re-export key types for ergonomic use.
pub use annotated::{AnnotatedGraphBuilder, SINK_LABEL, SOURCE_LABEL};
pub use error::{AnnotateError, PipelineError, SemanticError};
pub use pipeline::{Pipeline, Stages};
pub use semantic::SemanticGraphBuilder;
