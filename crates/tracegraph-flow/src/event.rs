//! Trace events emitted by runtime instrumentation.
//!
//! The instrumentation reports every traced call twice: once on entry
//! ([`CallEvent`]) and once on exit ([`ReturnEvent`]). Argument and return
//! values are snapshots ([`TraceValue`]); tracked objects carry their
//! caller-issued [`ObjectId`] and an attribute snapshot used for slot
//! capture.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use tracegraph_core::{FunctionRef, ObjectId, TypeRef};

use crate::error::FlowError;

/// A tracked runtime object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub class: TypeRef,
    /// Attribute snapshot taken when the event was emitted.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, TraceValue>,
}

impl ObjectRef {
    pub fn new(id: impl Into<String>, class: TypeRef) -> Self {
        ObjectRef {
            id: ObjectId::new(id),
            class,
            attributes: IndexMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: TraceValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// A bound method object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<ObjectId>,
}

/// Snapshot of a runtime value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TraceValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<TraceValue>),
    List(Vec<TraceValue>),
    Set(Vec<TraceValue>),
    Dict(Vec<(TraceValue, TraceValue)>),
    Object(ObjectRef),
    Method(MethodRef),
    /// An untracked value of a type with no structural representation.
    Opaque(TypeRef),
}

impl TraceValue {
    pub fn str(s: impl Into<String>) -> Self {
        TraceValue::Str(s.into())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            TraceValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Identity of the value, when it is a tracked object.
    pub fn object_id(&self) -> Option<&ObjectId> {
        self.as_object().map(|obj| &obj.id)
    }

    /// Class of the value, when it is not a builtin.
    pub fn non_builtin_class(&self) -> Option<&TypeRef> {
        match self {
            TraceValue::Object(obj) if !obj.class.is_builtin() => Some(&obj.class),
            TraceValue::Opaque(ty) if !ty.is_builtin() => Some(ty),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TraceValue::None)
    }

    /// Runtime type name, for diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            TraceValue::None => "NoneType".into(),
            TraceValue::Bool(_) => "bool".into(),
            TraceValue::Int(_) => "int".into(),
            TraceValue::Float(_) => "float".into(),
            TraceValue::Str(_) => "str".into(),
            TraceValue::Bytes(_) => "bytes".into(),
            TraceValue::Tuple(_) => "tuple".into(),
            TraceValue::List(_) => "list".into(),
            TraceValue::Set(_) => "set".into(),
            TraceValue::Dict(_) => "dict".into(),
            TraceValue::Object(obj) => obj.class.full_name(),
            TraceValue::Method(_) => "method".into(),
            TraceValue::Opaque(ty) => ty.full_name(),
        }
    }
}

/// Entry into a traced function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub function: FunctionRef,
    /// Whether the call body is opaque (not traced).
    #[serde(default = "default_atomic")]
    pub atomic: bool,
    /// Bound arguments in parameter order.
    #[serde(default)]
    pub arguments: IndexMap<String, TraceValue>,
}

fn default_atomic() -> bool {
    true
}

impl CallEvent {
    pub fn new(function: FunctionRef) -> Self {
        CallEvent {
            function,
            atomic: true,
            arguments: IndexMap::new(),
        }
    }

    pub fn traced(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: TraceValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn full_name(&self) -> String {
        self.function.full_name()
    }

    /// Unqualified function name.
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Name of the argument at a positional index.
    pub fn argument_name(&self, index: usize) -> Option<&str> {
        self.arguments.get_index(index).map(|(name, _)| name.as_str())
    }

    /// Builds the matching return event.
    pub fn returning(&self, return_value: TraceValue) -> ReturnEvent {
        ReturnEvent {
            call: self.clone(),
            return_value,
        }
    }
}

/// Exit from a traced function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnEvent {
    #[serde(flatten)]
    pub call: CallEvent,
    #[serde(default)]
    pub return_value: TraceValue,
}

impl ReturnEvent {
    pub fn full_name(&self) -> String {
        self.call.full_name()
    }
}

/// One event of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TraceEvent {
    Call(CallEvent),
    Return(ReturnEvent),
}

impl TraceEvent {
    /// Decodes an event document, rejecting unknown event kinds.
    pub fn from_json(doc: &serde_json::Value) -> Result<Self, FlowError> {
        match doc.get("event").and_then(|v| v.as_str()) {
            Some("call") | Some("return") => Ok(serde_json::from_value(doc.clone())?),
            Some(other) => Err(FlowError::UnrecognizedEvent {
                kind: other.to_string(),
            }),
            None => Err(FlowError::UnrecognizedEvent {
                kind: doc.get("event").map(|v| v.to_string()).unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_call_and_return() {
        let call = TraceEvent::from_json(&json!({
            "event": "call",
            "function": {"module": "pandas.io.sql", "qualified_name": "read_sql"},
            "atomic": true,
            "arguments": {
                "sql": {"kind": "str", "value": "SELECT 1"},
                "con": {"kind": "object", "value": {
                    "id": "c1",
                    "class": {"module": "sqlite3", "qualified_name": "Connection"}
                }}
            }
        }))
        .unwrap();
        let TraceEvent::Call(call) = call else { panic!("expected call") };
        assert_eq!(call.full_name(), "pandas.io.sql.read_sql");
        assert_eq!(call.argument_name(1), Some("con"));
        assert_eq!(call.arguments["con"].object_id(), Some(&ObjectId::new("c1")));

        let ret = TraceEvent::from_json(&json!({
            "event": "return",
            "function": {"module": "pandas.io.sql", "qualified_name": "read_sql"},
            "return_value": {"kind": "none"}
        }))
        .unwrap();
        assert!(matches!(ret, TraceEvent::Return(r) if r.return_value.is_none()));
    }

    #[test]
    fn calls_are_atomic_unless_marked_traced() {
        let decoded = TraceEvent::from_json(&json!({
            "event": "call",
            "function": {"module": "m", "qualified_name": "f"}
        }))
        .unwrap();
        let TraceEvent::Call(decoded) = decoded else { panic!("expected call") };
        assert!(decoded.atomic);
        assert_eq!(decoded, CallEvent::new(FunctionRef::new("m", "f")));
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let err = TraceEvent::from_json(&json!({"event": "yield", "function": {}})).unwrap_err();
        assert!(matches!(err, FlowError::UnrecognizedEvent { kind } if kind == "yield"));
        let err = TraceEvent::from_json(&json!({"function": {}})).unwrap_err();
        assert!(matches!(err, FlowError::UnrecognizedEvent { .. }));
    }

    #[test]
    fn builtin_classes_are_not_recorded() {
        let obj = TraceValue::Object(ObjectRef::new("x", TypeRef::new("builtins", "list")));
        assert!(obj.non_builtin_class().is_none());
        let obj = TraceValue::Object(ObjectRef::new("y", TypeRef::new("numpy", "ndarray")));
        assert_eq!(obj.non_builtin_class().unwrap().full_name(), "numpy.ndarray");
    }
}
