//! Error types for the annotated and semantic graph builders.

use thiserror::Error;

use tracegraph_core::{CoreError, NodeId};
use tracegraph_flow::FlowError;
use tracegraph_storage::StorageError;

/// Errors produced while building an annotated graph.
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// The input still holds a call with a nested body.
    #[error("call node {node} has a nested graph; flatten the trace first")]
    NestedCall { node: NodeId },

    #[error(transparent)]
    Graph(#[from] CoreError),
}

/// Errors produced while building a semantic graph.
#[derive(Debug, Error)]
pub enum SemanticError {
    /// Looking up an annotation record failed.
    #[error("annotation lookup failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Graph(#[from] CoreError),
}

/// Errors produced by the end-to-end pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    #[error(transparent)]
    Semantic(#[from] SemanticError),
}
