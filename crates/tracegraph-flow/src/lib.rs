//! Concrete flow graphs for tracegraph.
//!
//! Turns an ordered stream of call/return trace events into a
//! [`TraceGraph`]: an arena of flow graphs whose nodes are function calls
//! and whose edges are the objects flowing between them.
//!
//! # Modules
//!
//! - [`error`]: FlowError and ValueError
//! - [`event`]: trace events and value snapshots
//! - [`value`]: payload capture, slot retrieval, hidden referents
//! - [`graph`]: FlowGraph and the TraceGraph arena
//! - [`builder`]: FlowGraphBuilder, the event-driven graph builder
//! - [`transform`]: flatten and join

pub mod builder;
pub mod error;
pub mod event;
pub mod graph;
pub mod transform;
pub mod value;

// Re-export key types for ergonomic use.
pub use builder::{FlowConfig, FlowGraphBuilder};
pub use error::{FlowError, ValueError};
pub use event::{CallEvent, MethodRef, ObjectRef, ReturnEvent, TraceEvent, TraceValue};
pub use graph::{FlowGraph, Producer, TraceGraph};
pub use transform::{flatten, join};
pub use value::{is_primitive, json_clean};
