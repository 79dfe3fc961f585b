//! Edge payloads for each pipeline stage.

use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationKey, TypeRef};
use crate::id::ObjectId;
use crate::value::Payload;

/// What the flow graph knows about an object flowing along an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    /// Class of the object, recorded only when it is not a builtin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
}

/// Edge of a concrete flow graph: one object reference between two calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    #[serde(flatten)]
    pub object: ObjectData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl FlowEdge {
    pub fn id(&self) -> Option<&ObjectId> {
        self.object.id.as_ref()
    }

    pub fn carries(&self, id: &ObjectId) -> bool {
        self.object.id.as_ref() == Some(id)
    }
}

/// Edge of an annotated flow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Port of the adjacent action this edge attaches to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Direction of an action edge after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeRole {
    Input,
    Output,
}

/// Edge of a semantic flow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<EdgeRole>,
}

impl SemanticEdge {
    pub fn aspect(name: impl Into<String>) -> Self {
        SemanticEdge {
            aspect: Some(name.into()),
            role: None,
        }
    }

    pub fn is_input(&self) -> bool {
        self.role == Some(EdgeRole::Input)
    }

    pub fn is_output(&self) -> bool {
        self.role == Some(EdgeRole::Output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flow_edge_flattens_object_data() {
        let edge = FlowEdge {
            object: ObjectData {
                id: Some(ObjectId::new("o1")),
                value: Some(json!(2)),
                class: None,
                annotation: None,
            },
            source_port: Some("__return__".into()),
            target_port: None,
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json, json!({"id": "o1", "value": 2, "source_port": "__return__"}));
        let back: FlowEdge = serde_json::from_value(json).unwrap();
        assert!(back.carries(&ObjectId::new("o1")));
    }

    #[test]
    fn semantic_edge_roles() {
        let mut edge = SemanticEdge::aspect("data");
        assert!(!edge.is_input() && !edge.is_output());
        edge.role = Some(EdgeRole::Input);
        assert!(edge.is_input());
    }
}
