//! Core types for tracegraph.
//!
//! Everything the pipeline stages share: stable ids, the [`Multigraph`]
//! container and its edit operations, the node and edge payloads of each
//! stage, annotation records with the [`Annotator`] lookup interface, and
//! the [`Ontology`] queries used to type semantic graphs.
//!
//! # Modules
//!
//! - [`id`]: NodeId, EdgeId, GraphHandle, ObjectId
//! - [`graph`]: Multigraph, the id-stable multigraph wrapper
//! - [`ops`]: subgraph collapse, node insertion, closure, BFS
//! - [`node`]: per-stage node types
//! - [`edge`]: per-stage edge types
//! - [`annotation`]: annotation records and the Annotator trait
//! - [`ontology`]: Ontology trait and TypeRegistry
//! - [`value`]: payloads and value kinds
//! - [`error`]: CoreError

pub mod annotation;
pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod ontology;
pub mod ops;
pub mod value;

// Re-export key types for ergonomic use.
pub use annotation::{Annotation, AnnotationKey, AnnotationKind, Annotator, FunctionRef, NoAnnotations, SlotRef, TypeRef};
pub use edge::{AnnotatedEdge, EdgeRole, FlowEdge, ObjectData, SemanticEdge};
pub use error::CoreError;
pub use graph::{EdgeView, Multigraph};
pub use id::{EdgeId, GraphHandle, NodeId, ObjectId};
pub use node::{ActionNode, AnnotatedNode, CallNode, EntityData, EntityNode, FlowNode, Port, PortKind, RootKind, SemanticNode};
pub use ontology::{Aspect, OlogType, Ontology, TypeRegistry};
pub use ops::{Search, Traversal, Visit};
pub use value::{Payload, ValueKind};

/// Annotated flow graph: bipartite entities and actions.
pub type AnnotatedGraph = Multigraph<AnnotatedNode, AnnotatedEdge>;

/// Semantic flow graph: ontology-typed entities and actions.
pub type SemanticGraph = Multigraph<SemanticNode, SemanticEdge>;
