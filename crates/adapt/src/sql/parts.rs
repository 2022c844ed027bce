//! Flattening of an `objRecord` into `obj_parts` rows.
//!
//! Every reachable value (containers included) is recorded under its own
//! path and under each alias obtained by dropping array-index segments, so
//! `tags` also matches the elements of `tags.0`, `tags.1`, … the way a
//! document store traverses arrays implicitly.

use domain::JsonMap;
use serde_json::Value as Json;
use std::collections::BTreeSet;

/// Above this many index segments only the exact and the fully stripped
/// paths are recorded.
pub const MAX_STRIPPED_INDEXES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct PartRow {
    pub path: String,
    pub exact: bool,
    pub value_type: &'static str,
    pub value_string: Option<String>,
    pub value_number: Option<f64>,
    pub value_boolean: Option<bool>,
}

struct Segment {
    key: String,
    index: bool,
}

pub fn value_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Text stored in `value_string`; also what string-typed sorts compare.
pub fn value_text(v: &Json) -> Option<String> {
    match v {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn rows(record: &JsonMap) -> Vec<PartRow> {
    let mut out = Vec::new();
    let mut segments = Vec::new();
    for (key, value) in record {
        segments.push(Segment {
            key: key.clone(),
            index: false,
        });
        walk(value, &mut segments, &mut out);
        segments.pop();
    }
    out
}

fn walk(value: &Json, segments: &mut Vec<Segment>, out: &mut Vec<PartRow>) {
    emit(value, segments, out);
    match value {
        Json::Object(map) => {
            for (key, child) in map {
                segments.push(Segment {
                    key: key.clone(),
                    index: false,
                });
                walk(child, segments, out);
                segments.pop();
            }
        }
        Json::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                segments.push(Segment {
                    key: i.to_string(),
                    index: true,
                });
                walk(child, segments, out);
                segments.pop();
            }
        }
        _ => {}
    }
}

fn emit(value: &Json, segments: &[Segment], out: &mut Vec<PartRow>) {
    let n = segments.iter().filter(|s| s.index).count();

    // One flag per index segment: true drops it from the path.
    let variants: Vec<Vec<bool>> = if n <= MAX_STRIPPED_INDEXES {
        (0u32..(1 << n))
            .map(|mask| (0..n).map(|bit| mask & (1 << bit) != 0).collect())
            .collect()
    } else {
        vec![vec![false; n], vec![true; n]]
    };

    let mut seen = BTreeSet::new();
    for strip in variants {
        let mut flags = strip.iter();
        let path = segments
            .iter()
            .filter(|s| !s.index || !flags.next().copied().unwrap_or(false))
            .map(|s| s.key.as_str())
            .collect::<Vec<_>>()
            .join(".");
        if !seen.insert(path.clone()) {
            continue;
        }
        out.push(PartRow {
            path,
            exact: !strip.contains(&true),
            value_type: value_type(value),
            value_string: value_text(value),
            value_number: value.as_f64(),
            value_boolean: value.as_bool(),
        });
    }
}
