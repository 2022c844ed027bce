//! Field-metadata cache shared by backends that need type hints for sorting.

use chrono::{DateTime, Utc};
use domain::{FieldType, IndexedField, ObjField};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// `ObjField` rows for one `(appId, tag)`, keyed by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldHints {
    by_path: HashMap<String, ObjField>,
}

impl FieldHints {
    pub fn new(fields: impl IntoIterator<Item = ObjField>) -> Self {
        Self {
            by_path: fields.into_iter().map(|f| (f.path.clone(), f)).collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&ObjField> {
        self.by_path.get(path)
    }

    /// Storage type to assume for sorting on `path`.
    pub fn type_of(&self, path: &str) -> Option<FieldType> {
        self.by_path.get(path).map(|f| f.field_type)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn into_fields(self) -> impl Iterator<Item = ObjField> {
        self.by_path.into_values()
    }
}

type Key = (String, String);

/// Cache of `FieldHints` per `(appId, tag)`. Entries are dropped whenever
/// the indexing pipeline writes metadata for that key.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    inner: Arc<RwLock<HashMap<Key, Arc<FieldHints>>>>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app_id: &str, tag: &str) -> Option<Arc<FieldHints>> {
        self.inner
            .read()
            .get(&(app_id.to_owned(), tag.to_owned()))
            .cloned()
    }

    pub fn insert(&self, app_id: &str, tag: &str, hints: FieldHints) -> Arc<FieldHints> {
        let hints = Arc::new(hints);
        self.inner
            .write()
            .insert((app_id.to_owned(), tag.to_owned()), hints.clone());
        hints
    }

    pub fn invalidate(&self, app_id: &str, tag: &str) {
        self.inner
            .write()
            .remove(&(app_id.to_owned(), tag.to_owned()));
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Fold one indexer observation into the stored row for its path.
///
/// `arrayTypes` only grow. A compressed path's `type` is recomputed from the
/// union; a leaf path takes the latest observed type.
pub fn fold_indexed_field(
    existing: Option<&ObjField>,
    incoming: &IndexedField,
    app_id: &str,
    tag: &str,
    id: impl FnOnce() -> String,
    at: DateTime<Utc>,
) -> ObjField {
    match existing {
        None => ObjField {
            id: id(),
            app_id: app_id.to_owned(),
            tag: tag.to_owned(),
            path: incoming.path.clone(),
            field_type: incoming.field_type,
            array_types: incoming.array_types.clone(),
            is_array_compressed: incoming.is_array_compressed,
            created_at: at,
            updated_at: at,
        },
        Some(prev) => {
            let mut next = prev.clone();
            next.array_types.extend(incoming.array_types.iter().copied());
            next.is_array_compressed = prev.is_array_compressed || incoming.is_array_compressed;
            next.field_type = if next.is_array_compressed {
                FieldType::collapse(&next.array_types)
            } else {
                incoming.field_type
            };
            next.updated_at = at;
            next
        }
    }
}

/// Whether folding changed anything a reader would notice.
pub fn differs(a: &ObjField, b: &ObjField) -> bool {
    a.field_type != b.field_type
        || a.array_types != b.array_types
        || a.is_array_compressed != b.is_array_compressed
}
