//! Node payloads for each pipeline stage.
//!
//! Each stage has its own closed set of node roles:
//! - **Flow graph** ([`FlowNode`]): the `Input`/`Output` boundary markers
//!   and one [`CallNode`] per traced call.
//! - **Annotated graph** ([`AnnotatedNode`]): bipartite actions and entities.
//! - **Semantic graph** ([`SemanticNode`]): ontology-typed entities and
//!   actions.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::annotation::AnnotationKey;
use crate::id::{GraphHandle, ObjectId};
use crate::value::Payload;

// ---------------------------------------------------------------------------
// Shared entity data
// ---------------------------------------------------------------------------

/// Data describing an object about to become (or nested inside) an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    /// Explicit ontology type, set only for pseudo-objects.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub slots: IndexMap<String, EntityData>,
}

// ---------------------------------------------------------------------------
// Stage 1: flow graph
// ---------------------------------------------------------------------------

/// Whether a port receives or produces an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Input,
    Output,
}

/// A named argument or return slot on a call node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub portkind: PortKind,
    /// Argument this port reads from or writes back to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argname: Option<String>,
    /// 1-based index into the declared domain (inputs) or codomain (outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_index: Option<usize>,
    /// Annotation of the object passing through the port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    /// Slots captured from the object when it was produced.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub slots: IndexMap<String, EntityData>,
}

impl Port {
    pub fn new(portkind: PortKind) -> Self {
        Port {
            portkind,
            argname: None,
            annotation_index: None,
            annotation: None,
            id: None,
            value: None,
            slots: IndexMap::new(),
        }
    }

    /// Entity data for the object passing through this port.
    pub fn entity_data(&self) -> EntityData {
        EntityData {
            id: self.id.clone(),
            annotation: self.annotation.clone(),
            value: self.value.clone(),
            type_name: None,
            slots: self.slots.clone(),
        }
    }
}

/// A traced function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallNode {
    pub module: String,
    pub qualified_name: String,
    #[serde(default)]
    pub ports: IndexMap<String, Port>,
    /// Attribute name, when the call is an attribute access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
    /// Nested graph of the traced call body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphHandle>,
}

impl CallNode {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.qualified_name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&String, &Port)> {
        self.ports.iter().filter(|(_, p)| p.portkind == PortKind::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&String, &Port)> {
        self.ports.iter().filter(|(_, p)| p.portkind == PortKind::Output)
    }
}

/// Node of a concrete flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum FlowNode {
    /// Source of objects whose producer is unknown.
    Input,
    /// Sink of objects that are live at the end of the scope.
    Output,
    Call(CallNode),
}

impl FlowNode {
    pub fn as_call(&self) -> Option<&CallNode> {
        match self {
            FlowNode::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallNode> {
        match self {
            FlowNode::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, FlowNode::Input | FlowNode::Output)
    }
}

// ---------------------------------------------------------------------------
// Stage 2: annotated graph
// ---------------------------------------------------------------------------

/// A function call, or a collapsed group of unannotated calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
    pub label: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collapsed: bool,
}

impl ActionNode {
    pub fn new(annotation: Option<AnnotationKey>) -> Self {
        let label = annotation.as_ref().map(|k| k.id.clone()).unwrap_or_default();
        ActionNode {
            annotation,
            label,
            collapsed: false,
        }
    }

    pub fn collapsed() -> Self {
        ActionNode {
            collapsed: true,
            ..ActionNode::default()
        }
    }
}

/// An object, or a group of objects, flowing between actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationKey>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub slots: IndexMap<String, EntityData>,
}

impl From<EntityData> for EntityNode {
    fn from(data: EntityData) -> Self {
        let label = match (&data.annotation, &data.value) {
            (Some(key), _) => key.id.clone(),
            (None, Some(_)) => "value".to_string(),
            (None, None) => String::new(),
        };
        EntityNode {
            annotation: data.annotation,
            label,
            id: data.id,
            value: data.value,
            type_name: data.type_name,
            slots: data.slots,
        }
    }
}

/// Node of an annotated flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnnotatedNode {
    Action(ActionNode),
    Entity(EntityNode),
}

impl Default for AnnotatedNode {
    fn default() -> Self {
        AnnotatedNode::Action(ActionNode::default())
    }
}

impl AnnotatedNode {
    pub fn annotation(&self) -> Option<&AnnotationKey> {
        match self {
            AnnotatedNode::Action(a) => a.annotation.as_ref(),
            AnnotatedNode::Entity(e) => e.annotation.as_ref(),
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.annotation().is_some()
    }

    pub fn is_action(&self) -> bool {
        matches!(self, AnnotatedNode::Action(_))
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, AnnotatedNode::Entity(_))
    }

    pub fn label(&self) -> &str {
        match self {
            AnnotatedNode::Action(a) => &a.label,
            AnnotatedNode::Entity(e) => &e.label,
        }
    }

    pub fn root_kind(&self) -> RootKind {
        match self {
            AnnotatedNode::Action(_) => RootKind::Action,
            AnnotatedNode::Entity(_) => RootKind::Entity,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 3: semantic graph
// ---------------------------------------------------------------------------

/// The two root kinds every ontology type descends from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    #[default]
    Entity,
    Action,
}

impl RootKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RootKind::Entity => "entity",
            RootKind::Action => "action",
        }
    }
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node of a semantic flow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticNode {
    /// Ontology type name; at least the root kind.
    #[serde(rename = "type")]
    pub type_name: String,
    pub root: RootKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    /// Slot data awaiting reification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<IndexMap<String, EntityData>>,
}

impl SemanticNode {
    pub fn is_action(&self) -> bool {
        self.root == RootKind::Action
    }

    pub fn is_entity(&self) -> bool {
        self.root == RootKind::Entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_label_prefers_annotation() {
        let node = EntityNode::from(EntityData {
            annotation: Some(AnnotationKey::new("python", "pandas", "data-frame")),
            value: Some(json!(1)),
            ..EntityData::default()
        });
        assert_eq!(node.label, "data-frame");
    }

    #[test]
    fn entity_label_for_values_and_unknowns() {
        let valued = EntityNode::from(EntityData {
            value: Some(json!(3)),
            ..EntityData::default()
        });
        assert_eq!(valued.label, "value");
        assert_eq!(EntityNode::from(EntityData::default()).label, "");
    }

    #[test]
    fn action_label_is_annotation_id() {
        let action = ActionNode::new(Some(AnnotationKey::new("python", "sklearn", "fit")));
        assert_eq!(action.label, "fit");
        assert!(!action.collapsed);
        assert!(ActionNode::collapsed().collapsed);
    }

    #[test]
    fn flow_node_serializes_with_role_tag() {
        let node = FlowNode::Call(CallNode {
            module: "m".into(),
            qualified_name: "f".into(),
            ports: IndexMap::new(),
            slot: None,
            annotation: None,
            graph: None,
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["role"], "call");
        assert_eq!(json["qualified_name"], "f");
        assert_eq!(serde_json::to_value(FlowNode::Input).unwrap(), json!({"role": "input"}));
    }

    #[test]
    fn annotated_node_kind_tag() {
        let json = serde_json::to_value(AnnotatedNode::Entity(EntityNode::default())).unwrap();
        assert_eq!(json["kind"], "entity");
        let back: AnnotatedNode = serde_json::from_value(json).unwrap();
        assert!(back.is_entity());
    }
}
