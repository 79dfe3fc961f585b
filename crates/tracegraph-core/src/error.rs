//! Core error types for tracegraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! generic graph container, graph primitives and the ontology registry.

use thiserror::Error;

use crate::id::{EdgeId, NodeId};

/// Core errors produced by the tracegraph-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// An edge id was not found in the graph.
    #[error("edge not found: {id}")]
    EdgeNotFound { id: EdgeId },

    /// Attempting to add a node whose id is already present.
    #[error("duplicate node: {id}")]
    DuplicateNode { id: NodeId },

    /// Attempting to add an edge whose id is already present.
    #[error("duplicate edge: {id}")]
    DuplicateEdge { id: EdgeId },

    /// A graph required to be acyclic contains a cycle through `node`.
    #[error("graph contains a cycle through node {node}")]
    Cycle { node: NodeId },

    /// Attempting to register a type name that already exists in the ontology.
    #[error("duplicate type name: '{name}'")]
    DuplicateTypeName { name: String },

    /// A type name was not found in the ontology.
    #[error("type not found: '{name}'")]
    TypeNotFound { name: String },

    /// Two types have no subtype relation in either direction.
    #[error("types '{left}' and '{right}' are incomparable")]
    IncomparableTypes { left: String, right: String },

    /// A serialized graph document failed validation.
    #[error("invalid graph document: {reason}")]
    InvalidDocument { reason: String },
}
