//! Annotation records and the lookup interface used while building graphs.
//!
//! Annotations are authored externally and describe library functions
//! (`morphism`) and classes (`object`). Builders only ever see them through
//! the [`Annotator`] trait, which maps runtime functions and types to at most
//! one record each.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of an annotation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Object,
    Morphism,
}

/// Primary key of an annotation: `(language, package, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationKey {
    pub language: String,
    pub package: String,
    pub id: String,
}

impl AnnotationKey {
    pub fn new(language: impl Into<String>, package: impl Into<String>, id: impl Into<String>) -> Self {
        AnnotationKey {
            language: language.into(),
            package: package.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.language, self.package, self.id)
    }
}

/// Error parsing an [`AnnotationKey`] from its `language/package/id` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed annotation key: '{0}'")]
pub struct ParseKeyError(pub String);

impl FromStr for AnnotationKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(p), Some(id)) if !l.is_empty() && !p.is_empty() && !id.is_empty() => {
                Ok(AnnotationKey::new(l, p, id))
            }
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}

/// Reference to a function argument or object attribute.
///
/// Integers index positional arguments (0-based); names are argument names
/// or dotted attribute paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotRef {
    Index(usize),
    Name(String),
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::Index(i) => write!(f, "{}", i),
            SlotRef::Name(name) => f.write_str(name),
        }
    }
}

/// One entry of a morphism's domain or codomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub slot: SlotRef,
}

/// A full annotation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub language: String,
    pub package: String,
    pub id: String,
    pub kind: AnnotationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Classes the record applies to (all must be present on the type).
    #[serde(
        default,
        rename = "class",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub classes: Vec<String>,
    /// Ontology type the annotated object or function instantiates.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<SlotSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codomain: Vec<SlotSpec>,
    /// Object slots: aspect name to attribute path.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub slots: IndexMap<String, SlotRef>,
}

impl Annotation {
    pub fn key(&self) -> AnnotationKey {
        AnnotationKey::new(&self.language, &self.package, &self.id)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

// ---------------------------------------------------------------------------
// Lookup subjects
// ---------------------------------------------------------------------------

/// A runtime class, identified by module and qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub module: String,
    pub qualified_name: String,
    /// Full names of the ancestor classes in resolution order, nearest first,
    /// excluding the class itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
}

impl TypeRef {
    pub fn new(module: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        TypeRef {
            module: module.into(),
            qualified_name: qualified_name.into(),
            bases: Vec::new(),
        }
    }

    pub fn with_bases(mut self, bases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.bases = bases.into_iter().map(Into::into).collect();
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.qualified_name)
    }

    /// The class itself followed by its ancestors, nearest first.
    pub fn lineage(&self) -> Vec<String> {
        let mut names = vec![self.full_name()];
        names.extend(self.bases.iter().cloned());
        names
    }

    pub fn is_builtin(&self) -> bool {
        self.module == "builtins"
    }
}

/// A called function, optionally bound to a receiver type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    pub qualified_name: String,
    /// Type of the object a method is bound to. Differs from the class in
    /// `qualified_name` when a subclass inherits the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_type: Option<TypeRef>,
}

impl FunctionRef {
    pub fn new(module: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        FunctionRef {
            module: module.into(),
            qualified_name: qualified_name.into(),
            bound_type: None,
        }
    }

    pub fn bound_to(mut self, class: TypeRef) -> Self {
        self.bound_type = Some(class);
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.qualified_name)
    }

    /// Unqualified function name.
    pub fn name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }
}

/// Looks up annotations for runtime functions and classes.
///
/// A miss, or a lookup the implementation could not complete, is `None`.
pub trait Annotator {
    fn notate_function(&mut self, function: &FunctionRef) -> Option<Annotation>;

    fn notate_object(&mut self, class: &TypeRef) -> Option<Annotation>;
}

/// An annotator that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnnotations;

impl Annotator for NoAnnotations {
    fn notate_function(&mut self, _function: &FunctionRef) -> Option<Annotation> {
        None
    }

    fn notate_object(&mut self, _class: &TypeRef) -> Option<Annotation> {
        None
    }
}
