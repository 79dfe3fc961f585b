//! Error types for flow graph construction and manipulation.

use thiserror::Error;

use tracegraph_core::CoreError;

/// Errors produced while building, flattening or joining flow graphs.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A return event did not match the call on top of the stack.
    #[error("mismatched trace events: expected return from {expected}, got return from {found}", expected = expected.as_deref().unwrap_or("<empty stack>"))]
    MismatchedEvents {
        expected: Option<String>,
        found: String,
    },

    /// An event document named an unknown event kind.
    #[error("unrecognized trace event kind: '{kind}'")]
    UnrecognizedEvent { kind: String },

    /// An event document could not be decoded.
    #[error("malformed trace event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    /// A trace graph violated its structural invariants.
    #[error("invalid trace graph: {reason}")]
    InvalidGraph { reason: String },

    #[error(transparent)]
    Graph(#[from] CoreError),
}

/// Errors produced when a traced value cannot be captured as a payload.
#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    /// The value (or something it contains) has no JSON representation.
    #[error("value of type '{type_name}' is not JSON-able")]
    NotJsonable { type_name: String },

    /// Two dictionary keys stringify to the same JSON key.
    #[error("dictionary key collision on '{key}'")]
    KeyCollision { key: String },

    /// A dictionary key is not a scalar.
    #[error("unsupported dictionary key of kind '{kind}'")]
    UnsupportedKey { kind: String },
}
