//! Ontology types and the [`TypeRegistry`].
//!
//! An ontology is a set of named types forming a subtype lattice under
//! `entity` and `action`. Every type carries aspects (named, typed
//! relations to other types). The semantic builder only needs the queries of
//! the [`Ontology`] trait: type lookup, inherited aspects, most-specific and
//! common-supertype computations, and the type of a primitive payload.
//!
//! The registry pre-registers the two root types on construction.

use std::collections::{HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::RootKind;
use crate::value::ValueKind;

/// A named, typed relation from one type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aspect {
    pub name: String,
    /// Type of the aspect's target.
    pub codomain: String,
}

/// A type in the ontology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlogType {
    pub name: String,
    /// Root kind the type descends from when no supertype says otherwise.
    #[serde(default)]
    pub root: RootKind,
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub aspects: Vec<Aspect>,
}

impl OlogType {
    pub fn new(name: impl Into<String>, root: RootKind) -> Self {
        OlogType {
            name: name.into(),
            root,
            supertypes: Vec::new(),
            aspects: Vec::new(),
        }
    }

    pub fn with_supertype(mut self, name: impl Into<String>) -> Self {
        self.supertypes.push(name.into());
        self
    }

    pub fn with_aspect(mut self, name: impl Into<String>, codomain: impl Into<String>) -> Self {
        self.aspects.push(Aspect {
            name: name.into(),
            codomain: codomain.into(),
        });
        self
    }
}

/// Supertypes and aspects a type inherits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inherited {
    /// The type itself followed by its supertypes, nearest first.
    pub supertypes: IndexSet<String>,
    /// Aspects by name; a subtype's declaration shadows its supertypes'.
    pub aspects: IndexMap<String, Aspect>,
}

/// Queries the semantic builder makes against an ontology.
pub trait Ontology {
    fn get_type(&self, name: &str) -> Option<&OlogType>;

    /// Ontology type of primitive payloads of the given kind.
    fn value_type(&self, kind: ValueKind) -> Option<&str>;

    /// Breadth-first walk of the supertype lattice starting at `name`.
    fn inherited(&self, name: &str) -> Result<Inherited, CoreError> {
        let start = self
            .get_type(name)
            .ok_or_else(|| CoreError::TypeNotFound { name: name.to_string() })?;
        let mut out = Inherited::default();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        let mut roots = IndexSet::new();
        while let Some(ty) = queue.pop_front() {
            if !seen.insert(ty.name.clone()) {
                continue;
            }
            out.supertypes.insert(ty.name.clone());
            for aspect in &ty.aspects {
                out.aspects
                    .entry(aspect.name.clone())
                    .or_insert_with(|| aspect.clone());
            }
            if ty.supertypes.is_empty() {
                roots.insert(ty.root);
            }
            for sup in &ty.supertypes {
                let parent = self
                    .get_type(sup)
                    .ok_or_else(|| CoreError::TypeNotFound { name: sup.clone() })?;
                queue.push_back(parent);
            }
        }
        for root in roots {
            if let Some(ty) = self.get_type(root.as_str()) {
                if seen.insert(ty.name.clone()) {
                    out.supertypes.insert(ty.name.clone());
                    for aspect in &ty.aspects {
                        out.aspects
                            .entry(aspect.name.clone())
                            .or_insert_with(|| aspect.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        self.inherited(sub)
            .map(|inh| inh.supertypes.contains(sup))
            .unwrap_or(false)
    }

    /// The more specific of two comparable types.
    fn most_specific(&self, left: &str, right: &str) -> Result<String, CoreError> {
        if left == right {
            return Ok(left.to_string());
        }
        if self.is_subtype(left, right) {
            Ok(left.to_string())
        } else if self.is_subtype(right, left) {
            Ok(right.to_string())
        } else {
            Err(CoreError::IncomparableTypes {
                left: left.to_string(),
                right: right.to_string(),
            })
        }
    }

    /// Nearest supertype shared by both types, walking from `left`.
    fn common_supertype(&self, left: &str, right: &str) -> Option<String> {
        let l = self.inherited(left).ok()?;
        let r = self.inherited(right).ok()?;
        l.supertypes.into_iter().find(|name| r.supertypes.contains(name))
    }
}

/// Serialized ontology: a type list plus the primitive-value mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntologyDocument {
    #[serde(default)]
    pub types: Vec<OlogType>,
    #[serde(default)]
    pub value_types: IndexMap<ValueKind, String>,
}

/// In-memory ontology.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: IndexMap<String, OlogType>,
    value_types: IndexMap<ValueKind, String>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry containing only the `entity` and `action` roots.
    pub fn new() -> Self {
        let mut types = IndexMap::new();
        for root in [RootKind::Entity, RootKind::Action] {
            types.insert(root.as_str().to_string(), OlogType::new(root.as_str(), root));
        }
        TypeRegistry {
            types,
            value_types: IndexMap::new(),
        }
    }

    /// Registers a new type. Root types may be redeclared to add aspects.
    pub fn register(&mut self, ty: OlogType) -> Result<(), CoreError> {
        let is_root = ty.name == RootKind::Entity.as_str() || ty.name == RootKind::Action.as_str();
        if self.types.contains_key(&ty.name) && !is_root {
            return Err(CoreError::DuplicateTypeName { name: ty.name });
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    pub fn set_value_type(&mut self, kind: ValueKind, type_name: impl Into<String>) {
        self.value_types.insert(kind, type_name.into());
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn from_document(doc: OntologyDocument) -> Result<Self, CoreError> {
        let mut registry = TypeRegistry::new();
        for ty in doc.types {
            registry.register(ty)?;
        }
        for (kind, name) in doc.value_types {
            registry.set_value_type(kind, name);
        }
        for ty in registry.types.values() {
            for name in ty.supertypes.iter().chain(ty.aspects.iter().map(|a| &a.codomain)) {
                if !registry.types.contains_key(name) {
                    return Err(CoreError::TypeNotFound { name: name.clone() });
                }
            }
        }
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let doc: OntologyDocument = serde_json::from_str(json).map_err(|e| CoreError::InvalidDocument {
            reason: e.to_string(),
        })?;
        Self::from_document(doc)
    }
}

impl Ontology for TypeRegistry {
    fn get_type(&self, name: &str) -> Option<&OlogType> {
        self.types.get(name)
    }

    fn value_type(&self, kind: ValueKind) -> Option<&str> {
        self.value_types.get(&kind).map(String::as_str)
    }
}
