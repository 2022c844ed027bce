//! Recursive field discovery over a schemaless record.

use domain::field::ARRAY_MARKER;
use domain::{FieldType, IndexedField, JsonMap};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};

/// Flattened field map, ordered by path so output is deterministic.
pub type FieldMap = BTreeMap<String, IndexedField>;

/// Pure and total over any JSON value; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Indexer;

impl Indexer {
    pub fn index(&self, record: &JsonMap) -> FieldMap {
        let mut out = FieldMap::new();
        for (key, value) in record {
            walk(key, value, &mut out);
        }
        out
    }
}

fn join(prefix: &str, key: &str) -> String {
    format!("{prefix}.{key}")
}

fn walk(path: &str, value: &Json, out: &mut FieldMap) {
    match value {
        Json::Object(map) => {
            for (key, child) in map {
                walk(&join(path, key), child, out);
            }
        }
        Json::Array(items) => walk_array(path, items, out),
        scalar => {
            if let Some(t) = FieldType::of(scalar) {
                out.insert(path.to_owned(), IndexedField::leaf(path, t));
            }
        }
    }
}

fn walk_array(path: &str, items: &[Json], out: &mut FieldMap) {
    let mut element_types = BTreeSet::new();
    let mut key_types: BTreeMap<&str, BTreeSet<FieldType>> = BTreeMap::new();

    for (i, item) in items.iter().enumerate() {
        walk(&join(path, &i.to_string()), item, out);

        match item {
            Json::Object(map) => {
                for (key, child) in map {
                    if let Some(t) = FieldType::of(child) {
                        key_types.entry(key.as_str()).or_default().insert(t);
                    }
                }
            }
            Json::Array(_) => {}
            scalar => element_types.extend(FieldType::of(scalar)),
        }
    }

    let compressed = join(path, ARRAY_MARKER);
    if !element_types.is_empty() {
        out.insert(
            compressed.clone(),
            IndexedField::compressed(compressed.clone(), element_types),
        );
    }
    for (key, types) in key_types {
        let p = join(&compressed, key);
        out.insert(p.clone(), IndexedField::compressed(p, types));
    }
}
