//! Document queries.
//!
//! A [`Query`] is a conjunction of clauses over a JSON document. Supported
//! forms, in the usual document-database notation:
//! - `{"field": value}`: equality
//! - `{"field": {"$in": [v1, v2]}}`: membership
//! - `{"field": {"sub": value}}`: nested subset match
//! - `{"$or": [q1, q2]}`: disjunction of sub-queries
//!
//! Any other `$` operator is rejected at parse time.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::StorageError;

/// Condition on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    In(Vec<Value>),
    Nested(Query),
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Field { key: String, condition: Condition },
    Or(Vec<Query>),
}

/// A parsed document query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    /// The empty query; matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Field {
            key: key.into(),
            condition: Condition::Equals(value.into()),
        });
        self
    }

    pub fn is_in(mut self, key: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.clauses.push(Clause::Field {
            key: key.into(),
            condition: Condition::In(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn nested(mut self, key: impl Into<String>, query: Query) -> Self {
        self.clauses.push(Clause::Field {
            key: key.into(),
            condition: Condition::Nested(query),
        });
        self
    }

    pub fn or(mut self, alternatives: impl IntoIterator<Item = Query>) -> Self {
        self.clauses.push(Clause::Or(alternatives.into_iter().collect()));
        self
    }

    /// Parses a query from its JSON notation.
    pub fn parse(json: &Value) -> Result<Self, StorageError> {
        let Value::Object(map) = json else {
            return Err(StorageError::MalformedQuery {
                reason: format!("expected an object, got {}", json),
            });
        };
        Self::parse_object(map)
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Self, StorageError> {
        let mut query = Query::new();
        for (key, value) in map {
            if key == "$or" {
                let Value::Array(items) = value else {
                    return Err(StorageError::MalformedQuery {
                        reason: "$or expects an array of queries".into(),
                    });
                };
                let alternatives = items.iter().map(Query::parse).collect::<Result<Vec<_>, _>>()?;
                query.clauses.push(Clause::Or(alternatives));
            } else if key.starts_with('$') {
                return Err(StorageError::UnsupportedOperator { operator: key.clone() });
            } else {
                let condition = Self::parse_condition(value)?;
                query.clauses.push(Clause::Field {
                    key: key.clone(),
                    condition,
                });
            }
        }
        Ok(query)
    }

    fn parse_condition(value: &Value) -> Result<Condition, StorageError> {
        let Value::Object(map) = value else {
            return Ok(Condition::Equals(value.clone()));
        };
        let operators: Vec<&String> = map.keys().filter(|k| k.starts_with('$')).collect();
        if operators.is_empty() {
            return Ok(Condition::Nested(Self::parse_object(map)?));
        }
        if let Some(op) = operators.iter().find(|k| k.as_str() != "$in") {
            return Err(StorageError::UnsupportedOperator {
                operator: (*op).clone(),
            });
        }
        if map.len() != 1 {
            return Err(StorageError::MalformedQuery {
                reason: "$in cannot be combined with other keys".into(),
            });
        }
        match &map["$in"] {
            Value::Array(values) => Ok(Condition::In(values.clone())),
            _ => Err(StorageError::MalformedQuery {
                reason: "$in expects an array".into(),
            }),
        }
    }

    /// Does the document satisfy every clause?
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Or(alternatives) => alternatives.iter().any(|q| q.matches(doc)),
            Clause::Field { key, condition } => {
                let Some(field) = doc.as_object().and_then(|obj| obj.get(key)) else {
                    return false;
                };
                match condition {
                    Condition::Equals(expected) => field == expected,
                    Condition::In(options) => options.contains(field),
                    Condition::Nested(sub) => field.is_object() && sub.matches(field),
                }
            }
        })
    }

    /// JSON notation of the query.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for clause in &self.clauses {
            match clause {
                Clause::Or(alternatives) => {
                    map.insert("$or".into(), Value::Array(alternatives.iter().map(Query::to_json).collect()));
                }
                Clause::Field { key, condition } => {
                    let value = match condition {
                        Condition::Equals(v) => v.clone(),
                        Condition::In(vs) => serde_json::json!({ "$in": vs }),
                        Condition::Nested(q) => q.to_json(),
                    };
                    map.insert(key.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
