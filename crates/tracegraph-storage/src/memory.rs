//! In-memory implementation of [`AnnotationStore`].
//!
//! [`InMemoryAnnotationDb`] keeps every loaded document in a vector, keyed
//! by `(language, package, id)`. Reloading a document with an existing key
//! replaces it in place. Annotation files are JSON arrays of documents laid
//! out per language on a search path:
//!
//! ```text
//! <search dir>/<language>/<package>.json
//! <search dir>/<language>/<package>/**/*.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;
use crate::query::Query;
use crate::traits::{AnnotationStore, Document};

type DocumentKey = (String, String, String);

/// In-memory annotation database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAnnotationDb {
    search_path: Vec<PathBuf>,
    documents: Vec<Document>,
    index: HashMap<DocumentKey, usize>,
}

impl InMemoryAnnotationDb {
    /// Creates an empty database with an empty search path.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        InMemoryAnnotationDb {
            search_path: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Inserts one document, replacing any document with the same key.
    pub fn insert(&mut self, doc: Document) -> Result<(), StorageError> {
        let key = document_key(&doc)?;
        match self.index.get(&key) {
            Some(&pos) => self.documents[pos] = doc,
            None => {
                self.index.insert(key, self.documents.len());
                self.documents.push(doc);
            }
        }
        Ok(())
    }

    /// Inserts every document of a JSON array.
    pub fn load_documents(&mut self, docs: impl IntoIterator<Item = Document>) -> Result<usize, StorageError> {
        let mut count = 0;
        for doc in docs {
            self.insert(doc)?;
            count += 1;
        }
        Ok(count)
    }

    /// Loads a JSON file holding an array of annotation documents.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, StorageError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let docs: Vec<Document> = serde_json::from_str(&text)?;
        let count = self.load_documents(docs)?;
        debug!(path = %path.display(), count, "loaded annotation file");
        Ok(count)
    }

    fn language_dirs(&self, language: &str) -> Vec<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(language))
            .filter(|dir| dir.is_dir())
            .collect()
    }

    fn load_paths(&mut self, paths: Vec<PathBuf>) -> Result<usize, StorageError> {
        let mut total = 0;
        for path in paths {
            total += self.load_file(&path)?;
        }
        Ok(total)
    }
}

fn document_key(doc: &Document) -> Result<DocumentKey, StorageError> {
    let field = |name: &str| {
        doc.get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidDocument {
                reason: format!("missing string field '{}' in {}", name, doc),
            })
    };
    Ok((field("language")?, field("package")?, field("id")?))
}

/// Collects `*.json` files below `dir`, sorted for deterministic load order.
fn json_files_under(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StorageError> {
    let entries = fs::read_dir(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            json_files_under(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

impl AnnotationStore for InMemoryAnnotationDb {
    fn load_package(&mut self, language: &str, package: &str) -> Result<usize, StorageError> {
        let mut paths = Vec::new();
        for lang_dir in self.language_dirs(language) {
            let file = lang_dir.join(format!("{}.json", package));
            if file.is_file() {
                paths.push(file);
            }
            let dir = lang_dir.join(package);
            if dir.is_dir() {
                json_files_under(&dir, &mut paths)?;
            }
        }
        let count = self.load_paths(paths)?;
        debug!(language, package, count, "loaded package annotations");
        Ok(count)
    }

    fn load_all_packages(&mut self, language: &str) -> Result<usize, StorageError> {
        let mut paths = Vec::new();
        for lang_dir in self.language_dirs(language) {
            json_files_under(&lang_dir, &mut paths)?;
        }
        self.load_paths(paths)
    }

    fn filter(&self, query: &Query) -> Vec<&Document> {
        self.documents.iter().filter(|doc| query.matches(doc)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_db() -> InMemoryAnnotationDb {
        let mut db = InMemoryAnnotationDb::new();
        db.load_documents(vec![
            json!({"language": "python", "package": "opendisc", "id": "foo",
                   "kind": "object", "class": "opendisc.core.tests.objects.Foo",
                   "slots": {"sum": "do_sum", "prod": "do_prod"}}),
            json!({"language": "python", "package": "opendisc", "id": "bar",
                   "kind": "object", "class": "opendisc.core.tests.objects.Bar",
                   "slots": {"sum": "do_sum"}, "extra": {"deep": true}}),
            json!({"language": "python", "package": "opendisc", "id": "baz",
                   "kind": "morphism", "function": "opendisc.core.tests.objects.baz"}),
        ])
        .unwrap();
        db
    }

    #[test]
    fn basic_get() {
        let db = sample_db();
        let doc = db.get(&Query::new().equals("id", "foo")).unwrap().unwrap();
        assert_eq!(doc["id"], "foo");
        assert!(db.get(&Query::new().equals("id", "XXX")).unwrap().is_none());
        let err = db.get(&Query::new().equals("kind", "object")).unwrap_err();
        assert!(matches!(err, StorageError::AmbiguousQuery { matches: 2, .. }));
    }

    #[test]
    fn basic_filter() {
        let db = sample_db();
        let q = Query::new()
            .equals("language", "python")
            .equals("package", "opendisc")
            .equals("id", "foo");
        let found = db.filter(&q);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "foo");
    }

    #[test]
    fn or_and_in_operators() {
        let db = sample_db();
        let q = Query::parse(&json!({"$or": [{"id": "foo"}, {"id": "bar"}]})).unwrap();
        assert_eq!(db.filter(&q).len(), 2);
        let q = Query::parse(&json!({"id": {"$in": ["foo", "bar"]}})).unwrap();
        assert_eq!(db.filter(&q).len(), 2);
    }

    #[test]
    fn nested_query() {
        let db = sample_db();
        let q = Query::parse(&json!({"kind": "object", "slots": {"prod": "do_prod"}})).unwrap();
        let found = db.filter(&q);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "foo");
    }

    #[test]
    fn reinsert_replaces_document() {
        let mut db = sample_db();
        db.insert(json!({"language": "python", "package": "opendisc", "id": "foo",
                         "kind": "object", "class": "Other"}))
            .unwrap();
        assert_eq!(db.len(), 3);
        let doc = db.get(&Query::new().equals("id", "foo")).unwrap().unwrap();
        assert_eq!(doc["class"], "Other");
    }

    #[test]
    fn documents_need_primary_key() {
        let mut db = InMemoryAnnotationDb::new();
        let err = db.insert(json!({"language": "python", "id": "x"})).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDocument { .. }));
    }

    #[test]
    fn typed_lookup() {
        let db = sample_db();
        let note = db
            .get_annotation(&Query::new().equals("id", "baz"))
            .unwrap()
            .unwrap();
        assert_eq!(note.function.as_deref(), Some("opendisc.core.tests.objects.baz"));
        assert_eq!(db.filter_annotations(&Query::new().equals("kind", "object")).unwrap().len(), 2);
    }
}
