//! Identity tokens for graph elements and traced objects.
//!
//! Node and edge identifiers are opaque UUID v4 tokens: unique across
//! builds with overwhelming probability and never reused within a graph.
//! [`ObjectId`] is issued by the instrumentation layer, never derived from
//! memory addresses, so identity survives across events.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

/// Stable edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

/// Handle of a nested graph inside a flow-graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphHandle(pub u32);

/// Caller-issued identity token of a traced runtime object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl NodeId {
    /// Generates a fresh node identifier.
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl EdgeId {
    /// Generates a fresh edge identifier.
    pub fn generate() -> Self {
        EdgeId(Uuid::new_v4())
    }
}

impl ObjectId {
    pub fn new(token: impl Into<String>) -> Self {
        ObjectId(token.into())
    }

    /// Generates a synthetic object identity for references that carry none.
    pub fn generate() -> Self {
        ObjectId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl GraphHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// Display implementations print the compact hex form.

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Display for GraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(token: &str) -> Self {
        ObjectId(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_node_ids_are_unique() {
        let ids: HashSet<NodeId> = (0..1000).map(|_| NodeId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn node_id_displays_compact_hex() {
        let token = NodeId::generate().to_string();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn object_id_serializes_as_plain_string() {
        let id = ObjectId::new("obj-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"obj-7\"");
        let back: ObjectId = serde_json::from_str("\"obj-7\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_formats() {
        assert_eq!(GraphHandle(3).to_string(), "graph#3");
        assert_eq!(ObjectId::from("x").to_string(), "x");
    }
}
