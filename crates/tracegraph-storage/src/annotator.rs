//! Database-backed [`Annotator`].
//!
//! [`DbAnnotator`] resolves runtime functions and classes against an
//! [`AnnotationStore`], loading package annotations on first use.
//!
//! Class-based lookups (objects and bound methods) consider every annotation
//! whose class list is contained in the class lineage and pick the one of
//! highest precedence: `a <= b` iff every class of `a` is an ancestor of (or
//! equal to) some class of `b`. Without a unique maximum, the first maximal
//! record in load order wins.

use std::collections::{HashMap, HashSet};

use tracing::{trace, warn};

use tracegraph_core::{Annotation, Annotator, FunctionRef, TypeRef};

use crate::query::Query;
use crate::traits::AnnotationStore;

/// Settings for [`DbAnnotator`].
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Language key of the annotations to consult.
    pub language: String,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        AnnotatorConfig {
            language: "python".to_string(),
        }
    }
}

/// An [`Annotator`] answering from an annotation store.
#[derive(Debug)]
pub struct DbAnnotator<S> {
    store: S,
    config: AnnotatorConfig,
    loaded: HashSet<String>,
}

impl<S: AnnotationStore> DbAnnotator<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, AnnotatorConfig::default())
    }

    pub fn with_config(store: S, config: AnnotatorConfig) -> Self {
        DbAnnotator {
            store,
            config,
            loaded: HashSet::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn ensure_loaded(&mut self, package: &str) {
        if self.loaded.insert(package.to_string()) {
            if let Err(err) = self.store.load_package(&self.config.language, package) {
                warn!(package, error = %err, "failed to load package annotations");
            }
        }
    }

    fn query(&mut self, package: &str, query: Query) -> Vec<Annotation> {
        self.ensure_loaded(package);
        let query = query
            .equals("language", self.config.language.as_str())
            .equals("package", package);
        match self.store.filter_annotations(&query) {
            Ok(notes) => notes,
            Err(err) => {
                warn!(%query, error = %err, "annotation lookup failed");
                Vec::new()
            }
        }
    }

    /// Best annotation for a class, per the precedence order above.
    fn resolve_type(&mut self, class: &TypeRef, extra: impl Fn() -> Query) -> Option<Annotation> {
        let lineage = class.lineage();
        let position: HashMap<&str, usize> = lineage
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        // An ancestor never precedes its descendants in a resolution order.
        let is_ancestor = |sup: &str, sub: &str| position[sub] <= position[sup];
        let le = |first: &Annotation, second: &Annotation| {
            first
                .classes
                .iter()
                .all(|c1| second.classes.iter().any(|c2| is_ancestor(c1, c2)))
        };

        let mut packages: Vec<&str> = Vec::new();
        for name in &lineage {
            let package = top_level_package(name);
            if !packages.contains(&package) {
                packages.push(package);
            }
        }

        let mut best: Option<Annotation> = None;
        for package in packages {
            for note in self.query(package, extra()) {
                let applies = !note.classes.is_empty()
                    && note.classes.iter().all(|c| position.contains_key(c.as_str()));
                if applies && best.as_ref().map_or(true, |b| le(b, &note)) {
                    best = Some(note);
                }
            }
        }
        best
    }
}

fn top_level_package(full_name: &str) -> &str {
    full_name.split('.').next().unwrap_or(full_name)
}

impl<S: AnnotationStore> Annotator for DbAnnotator<S> {
    fn notate_function(&mut self, function: &FunctionRef) -> Option<Annotation> {
        if let Some(bound) = &function.bound_type {
            let method = function.name().to_string();
            let note = self.resolve_type(bound, || {
                Query::new()
                    .equals("kind", "morphism")
                    .equals("method", method.as_str())
            });
            if note.is_some() {
                trace!(function = %function.full_name(), "resolved method annotation");
                return note;
            }
        }
        let name = function.full_name();
        let package = top_level_package(&name).to_string();
        let query = Query::new()
            .equals("kind", "morphism")
            .equals("function", name.as_str());
        self.query(&package, query).into_iter().next()
    }

    fn notate_object(&mut self, class: &TypeRef) -> Option<Annotation> {
        self.resolve_type(class, || Query::new().equals("kind", "object"))
    }
}
