//! Payload capture and slot retrieval for traced values.
//!
//! Only values with a lossless JSON form are captured as literal payloads.
//! [`json_clean`] performs that conversion and rejects everything else;
//! [`is_primitive`] is its boolean form.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};

use tracegraph_core::{Payload, SlotRef};

use crate::error::ValueError;
use crate::event::{ObjectRef, TraceValue};

/// Converts a traced value to its JSON payload.
///
/// Non-finite floats become the strings `"nan"`, `"inf"` and `"-inf"`;
/// bytes are decoded as lossy UTF-8; tuples and sets become arrays.
/// Dictionary keys are stringified and must not collide.
pub fn json_clean(value: &TraceValue) -> Result<Payload, ValueError> {
    Ok(match value {
        TraceValue::None => Value::Null,
        TraceValue::Bool(b) => Value::Bool(*b),
        TraceValue::Int(i) => Value::from(*i),
        TraceValue::Float(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            None => Value::String(non_finite_repr(*f).to_string()),
        },
        TraceValue::Str(s) => Value::String(s.clone()),
        TraceValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        TraceValue::Tuple(items) | TraceValue::List(items) | TraceValue::Set(items) => {
            Value::Array(items.iter().map(json_clean).collect::<Result<_, _>>()?)
        }
        TraceValue::Dict(entries) => {
            let mut map = Map::new();
            for (key, item) in entries {
                let key = stringify_key(key)?;
                if map.contains_key(&key) {
                    return Err(ValueError::KeyCollision { key });
                }
                map.insert(key, json_clean(item)?);
            }
            Value::Object(map)
        }
        TraceValue::Object(_) | TraceValue::Method(_) | TraceValue::Opaque(_) => {
            return Err(ValueError::NotJsonable {
                type_name: value.type_name(),
            })
        }
    })
}

/// Whether a value can be captured as a literal payload.
pub fn is_primitive(value: &TraceValue) -> bool {
    json_clean(value).is_ok()
}

fn non_finite_repr(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

fn float_repr(f: f64) -> String {
    if !f.is_finite() {
        non_finite_repr(f).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

fn stringify_key(key: &TraceValue) -> Result<String, ValueError> {
    match key {
        TraceValue::Str(s) => Ok(s.clone()),
        TraceValue::Int(i) => Ok(i.to_string()),
        TraceValue::Float(f) => Ok(float_repr(*f)),
        TraceValue::Bool(true) => Ok("True".into()),
        TraceValue::Bool(false) => Ok("False".into()),
        TraceValue::None => Ok("None".into()),
        other => Err(ValueError::UnsupportedKey {
            kind: other.type_name(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Retrieves a slot from a value.
///
/// Names are dotted paths; each segment is looked up as an object
/// attribute, then as a sequence index, then as a dictionary key. Integer
/// slots index sequences directly. Returns `None` when any segment is
/// missing or resolves to a bound method.
pub fn get_slot<'a>(value: &'a TraceValue, slot: &SlotRef) -> Option<&'a TraceValue> {
    let found = match slot {
        SlotRef::Index(i) => index(value, *i as i64),
        SlotRef::Name(path) => path
            .split('.')
            .try_fold(value, |current, key| single_slot(current, key)),
    }?;
    match found {
        TraceValue::Method(_) => None,
        other => Some(other),
    }
}

fn single_slot<'a>(value: &'a TraceValue, key: &str) -> Option<&'a TraceValue> {
    if let TraceValue::Object(obj) = value {
        if let Some(attr) = obj.attributes.get(key) {
            return Some(attr);
        }
    }
    let int_key = key.parse::<i64>().ok();
    match value {
        TraceValue::Tuple(_) | TraceValue::List(_) => index(value, int_key?),
        TraceValue::Dict(entries) => entries
            .iter()
            .find(|(k, _)| match k {
                TraceValue::Str(s) => s == key,
                TraceValue::Int(i) => Some(*i) == int_key,
                _ => false,
            })
            .map(|(_, v)| v),
        _ => None,
    }
}

fn index(value: &TraceValue, i: i64) -> Option<&TraceValue> {
    let items = match value {
        TraceValue::Tuple(items) | TraceValue::List(items) => items,
        _ => return None,
    };
    let len = items.len() as i64;
    let i = if i < 0 { len + i } else { i };
    if (0..len).contains(&i) {
        items.get(i as usize)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Hidden referents
// ---------------------------------------------------------------------------

/// Tracked objects held directly by an untracked container.
///
/// Builtin containers carry no identity of their own, so objects reachable
/// only through them would otherwise be invisible to the flow graph.
pub fn hidden_referents(value: &TraceValue) -> Vec<&ObjectRef> {
    let members: Vec<&TraceValue> = match value {
        TraceValue::Tuple(items) | TraceValue::List(items) | TraceValue::Set(items) => {
            items.iter().collect()
        }
        TraceValue::Dict(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
        _ => Vec::new(),
    };
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter_map(TraceValue::as_object)
        .filter(|obj| seen.insert(&obj.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracegraph_core::TypeRef;

    fn obj(id: &str) -> TraceValue {
        TraceValue::Object(ObjectRef::new(id, TypeRef::new("pkg", "Thing")))
    }

    #[test]
    fn cleans_scalars_and_containers() {
        let value = TraceValue::Dict(vec![
            (TraceValue::str("a"), TraceValue::Int(1)),
            (TraceValue::Int(2), TraceValue::Tuple(vec![TraceValue::Bool(true), TraceValue::None])),
            (TraceValue::Float(1.0), TraceValue::Float(f64::NAN)),
        ]);
        assert_eq!(
            json_clean(&value).unwrap(),
            json!({"a": 1, "2": [true, null], "1.0": "nan"})
        );
        assert_eq!(json_clean(&TraceValue::Float(f64::NEG_INFINITY)).unwrap(), json!("-inf"));
        assert_eq!(json_clean(&TraceValue::Bytes(b"abc".to_vec())).unwrap(), json!("abc"));
    }

    #[test]
    fn rejects_objects_and_collisions() {
        assert!(!is_primitive(&obj("x")));
        assert!(!is_primitive(&TraceValue::List(vec![TraceValue::Int(1), obj("x")])));
        let colliding = TraceValue::Dict(vec![
            (TraceValue::Int(1), TraceValue::None),
            (TraceValue::str("1"), TraceValue::None),
        ]);
        assert_eq!(
            json_clean(&colliding).unwrap_err(),
            ValueError::KeyCollision { key: "1".into() }
        );
    }

    #[test]
    fn slot_paths_walk_attributes_indices_and_keys() {
        let inner = TraceValue::Dict(vec![(TraceValue::str("k"), TraceValue::Int(7))]);
        let value = TraceValue::Object(
            ObjectRef::new("o", TypeRef::new("pkg", "Thing"))
                .with_attribute("items", TraceValue::List(vec![TraceValue::Int(1), inner]))
                .with_attribute("name", TraceValue::str("n")),
        );
        let name = SlotRef::Name("name".into());
        assert_eq!(get_slot(&value, &name), Some(&TraceValue::str("n")));
        let path = SlotRef::Name("items.1.k".into());
        assert_eq!(get_slot(&value, &path), Some(&TraceValue::Int(7)));
        let last = SlotRef::Name("items.-2".into());
        assert_eq!(get_slot(&value, &last), Some(&TraceValue::Int(1)));
        assert!(get_slot(&value, &SlotRef::Name("missing".into())).is_none());

        let list = TraceValue::List(vec![TraceValue::Int(5)]);
        assert_eq!(get_slot(&list, &SlotRef::Index(0)), Some(&TraceValue::Int(5)));
        assert!(get_slot(&list, &SlotRef::Index(3)).is_none());
    }

    #[test]
    fn hidden_referents_are_direct_container_members() {
        let nested = TraceValue::List(vec![obj("deep")]);
        let value = TraceValue::Tuple(vec![obj("a"), TraceValue::Int(1), obj("a"), nested]);
        let ids: Vec<_> = hidden_referents(&value).iter().map(|o| o.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["a"]);
        let dict = TraceValue::Dict(vec![(obj("k"), obj("v"))]);
        assert_eq!(hidden_referents(&dict).len(), 2);
        assert!(hidden_referents(&obj("x")).is_empty());
    }
}
