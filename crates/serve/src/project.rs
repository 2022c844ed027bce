//! `fields` projection over `objRecord`.
//!
//! Paths walk objects by key and fan out over arrays: object elements keep
//! their position (empty when nothing is picked), scalar elements are
//! dropped.

use domain::{JsonMap, Obj};
use serde_json::Value as Json;

pub fn project(obj: &mut Obj, fields: Option<&[String]>) {
    if let Some(fields) = fields {
        obj.obj_record = project_record(&obj.obj_record, fields);
    }
}

pub fn project_record(record: &JsonMap, fields: &[String]) -> JsonMap {
    let mut out = JsonMap::new();
    for field in fields {
        let segments: Vec<&str> = field.split('.').collect();
        if let Some(picked) = pick_map(record, &segments) {
            merge_into(&mut out, picked);
        }
    }
    out
}

fn pick_map(map: &JsonMap, segments: &[&str]) -> Option<JsonMap> {
    let (head, rest) = segments.split_first()?;
    let value = pick(map.get(*head)?, rest)?;
    let mut out = JsonMap::new();
    out.insert((*head).to_owned(), value);
    Some(out)
}

fn pick(value: &Json, segments: &[&str]) -> Option<Json> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Json::Object(map) => pick_map(map, segments).map(Json::Object),
        Json::Array(items) => Some(Json::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Json::Object(map) => {
                        Some(Json::Object(pick_map(map, segments).unwrap_or_default()))
                    }
                    Json::Array(_) => pick(item, segments),
                    _ => None,
                })
                .collect(),
        )),
        _ => None,
    }
}

fn merge_into(target: &mut JsonMap, source: JsonMap) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Json::Object(t)), Json::Object(s)) => merge_into(t, s),
            (Some(Json::Array(t)), Json::Array(s)) => {
                for (te, se) in t.iter_mut().zip(s) {
                    if let (Json::Object(te), Json::Object(se)) = (te, se) {
                        merge_into(te, se);
                    }
                }
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
