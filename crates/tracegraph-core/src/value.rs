//! Captured primitive payloads.
//!
//! Primitive values observed at runtime are stored in their JSON-clean form.
//! [`ValueKind`] classifies a payload so the ontology can map it to a
//! value type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A captured primitive value in JSON-clean form.
pub type Payload = serde_json::Value;

/// JSON-level classification of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Dict,
}

impl ValueKind {
    pub fn of(value: &Payload) -> Self {
        match value {
            Payload::Null => ValueKind::Null,
            Payload::Bool(_) => ValueKind::Bool,
            Payload::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Int,
            Payload::Number(_) => ValueKind::Float,
            Payload::String(_) => ValueKind::Str,
            Payload::Array(_) => ValueKind::List,
            Payload::Object(_) => ValueKind::Dict,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::List => "list",
            ValueKind::Dict => "dict",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_numbers() {
        assert_eq!(ValueKind::of(&json!(3)), ValueKind::Int);
        assert_eq!(ValueKind::of(&json!(u64::MAX)), ValueKind::Int);
        assert_eq!(ValueKind::of(&json!(2.5)), ValueKind::Float);
    }

    #[test]
    fn classifies_containers() {
        assert_eq!(ValueKind::of(&json!([1, 2])), ValueKind::List);
        assert_eq!(ValueKind::of(&json!({"a": 1})), ValueKind::Dict);
        assert_eq!(ValueKind::of(&json!(null)).to_string(), "null");
    }
}
