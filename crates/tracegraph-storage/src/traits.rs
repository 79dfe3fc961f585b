//! The [`AnnotationStore`] trait defining the annotation database contract.
//!
//! Backends provide package loading and filtered queries over raw JSON
//! documents. Single-result lookups and typed decoding into [`Annotation`]
//! are built on top of `filter` as provided methods.

use tracegraph_core::Annotation;

use crate::error::StorageError;
use crate::query::Query;

/// A raw annotation document.
pub type Document = serde_json::Value;

/// The storage contract for annotation databases.
///
/// The trait is synchronous; loading is explicit and idempotent, so callers
/// may load a package more than once.
pub trait AnnotationStore {
    /// Loads every annotation file of `package` for `language` found on the
    /// search path. Returns the number of documents loaded.
    fn load_package(&mut self, language: &str, package: &str) -> Result<usize, StorageError>;

    /// Loads every annotation file for `language` found on the search path.
    fn load_all_packages(&mut self, language: &str) -> Result<usize, StorageError>;

    /// All loaded documents matching `query`, in load order.
    fn filter(&self, query: &Query) -> Vec<&Document>;

    /// The single document matching `query`, if any.
    ///
    /// Fails with [`StorageError::AmbiguousQuery`] on more than one match.
    fn get(&self, query: &Query) -> Result<Option<&Document>, StorageError> {
        let mut found = self.filter(query);
        if found.len() > 1 {
            return Err(StorageError::AmbiguousQuery {
                query: query.to_string(),
                matches: found.len(),
            });
        }
        Ok(found.pop())
    }

    /// Typed variant of [`AnnotationStore::get`].
    fn get_annotation(&self, query: &Query) -> Result<Option<Annotation>, StorageError> {
        match self.get(query)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.clone())?)),
            None => Ok(None),
        }
    }

    /// Typed variant of [`AnnotationStore::filter`].
    fn filter_annotations(&self, query: &Query) -> Result<Vec<Annotation>, StorageError> {
        self.filter(query)
            .into_iter()
            .map(|doc| serde_json::from_value(doc.clone()).map_err(StorageError::from))
            .collect()
    }
}

impl<S: AnnotationStore + ?Sized> AnnotationStore for &mut S {
    fn load_package(&mut self, language: &str, package: &str) -> Result<usize, StorageError> {
        (**self).load_package(language, package)
    }

    fn load_all_packages(&mut self, language: &str) -> Result<usize, StorageError> {
        (**self).load_all_packages(language)
    }

    fn filter(&self, query: &Query) -> Vec<&Document> {
        (**self).filter(query)
    }
}
