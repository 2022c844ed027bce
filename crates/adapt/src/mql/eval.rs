// crates/adapt/src/mql/eval.rs
use serde_json::Value as Json;
use std::cmp::Ordering;

use crate::mql::ast::{CmpOp, Filter};
use crate::query::coerce::parse_date_ms;

/// Resolve a dotted path the way a document store does: array elements are
/// traversed implicitly and numeric segments also address positions.
///
/// Every reachable value is returned, containers included.
pub fn field_values<'a>(doc: &'a Json, path: &str) -> Vec<&'a Json> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Json, segments: &[&str], out: &mut Vec<&'a Json>) {
    match (value, segments.split_first()) {
        (Json::Array(items), rest) => {
            if rest.is_none() {
                out.push(value);
            }
            if let Some((head, tail)) = rest {
                if let Some(item) = head.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    collect(item, tail, out);
                }
            }
            for item in items {
                collect(item, segments, out);
            }
        }
        (_, None) => out.push(value),
        (Json::Object(map), Some((head, tail))) => {
            if let Some(child) = map.get(*head) {
                collect(child, tail, out);
            }
        }
        _ => {}
    }
}

/// Plain (non-traversing) lookup, used for sorting.
pub fn get_field_value<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    let mut current = doc;
    for part in path.split('.') {
        current = match current {
            Json::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current)
}

/// Scalar equality; numbers compare by value so `1` equals `1.0`.
fn scalar_eq(actual: &Json, expected: &Json) -> bool {
    match (actual, expected) {
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

/// Numeric view used by range operators: numbers as-is, ISO-8601 strings as
/// epoch milliseconds.
fn as_range_number(v: &Json) -> Option<f64> {
    match v {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => parse_date_ms(s).map(|ms| ms as f64),
        _ => None,
    }
}

fn range(actual: &Json, expected: &Json, accept: fn(Ordering) -> bool) -> bool {
    let ord = match (actual, expected) {
        (Json::String(a), Json::String(b)) => match (parse_date_ms(a), parse_date_ms(b)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => Some(a.as_str().cmp(b.as_str())),
        },
        _ => match (as_range_number(actual), as_range_number(expected)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ord.is_some_and(accept)
}

fn matches_eq(candidates: &[&Json], expected: &Json) -> bool {
    if expected.is_null() && candidates.is_empty() {
        return true;
    }
    candidates.iter().any(|c| scalar_eq(c, expected))
}

/// Evaluate a single comparison operator against every reachable value.
fn eval_cmp(op: &CmpOp, candidates: &[&Json]) -> bool {
    use CmpOp::*;

    match op {
        Eq(expected) => matches_eq(candidates, expected),
        Ne(expected) => !matches_eq(candidates, expected),
        Gt(expected) => candidates.iter().any(|c| range(c, expected, Ordering::is_gt)),
        Gte(expected) => candidates.iter().any(|c| range(c, expected, Ordering::is_ge)),
        Lt(expected) => candidates.iter().any(|c| range(c, expected, Ordering::is_lt)),
        Lte(expected) => candidates.iter().any(|c| range(c, expected, Ordering::is_le)),
        In(list) => list.iter().any(|v| matches_eq(candidates, v)),
        Nin(list) => !list.iter().any(|v| matches_eq(candidates, v)),
        Exists(flag) => candidates.is_empty() != *flag,
        Regex(pattern) => candidates
            .iter()
            .any(|c| c.as_str().is_some_and(|s| pattern.is_match(s))),
    }
}

/// Evaluate a full Filter against a document.
pub fn eval_filter(filter: &Filter, doc: &Json) -> bool {
    use Filter::*;

    match filter {
        Field(expr) => eval_cmp(&expr.op, &field_values(doc, &expr.path)),
        And(filters) => filters.iter().all(|f| eval_filter(f, doc)),
        Or(filters) => filters.iter().any(|f| eval_filter(f, doc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mql::ast::{FieldExpr, Pattern};
    use serde_json::json;

    fn field(path: &str, op: CmpOp) -> Filter {
        Filter::Field(FieldExpr {
            path: path.into(),
            op,
        })
    }

    // ─────────────────────────────────────────────────────────────
    // path resolution
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn field_values_traverses_arrays() {
        let doc = json!({ "a": [{ "b": 1 }, { "b": 2 }, { "c": 3 }] });
        assert_eq!(field_values(&doc, "a.b"), vec![&json!(1), &json!(2)]);
        assert_eq!(field_values(&doc, "a.1.b"), vec![&json!(2)]);
        assert!(field_values(&doc, "a.d").is_empty());
    }

    #[test]
    fn field_values_on_array_leaf_includes_elements() {
        let doc = json!({ "tags": ["x", "y"] });
        let vals = field_values(&doc, "tags");
        assert_eq!(vals[0], &json!(["x", "y"]));
        assert!(vals.contains(&&json!("y")));
    }

    #[test]
    fn get_field_value_is_positional() {
        let doc = json!({ "a": { "b": [10, 20] } });
        assert_eq!(get_field_value(&doc, "a.b.1"), Some(&json!(20)));
        assert_eq!(get_field_value(&doc, "a.c"), None);
        assert_eq!(get_field_value(&doc, ""), None);
    }

    // ─────────────────────────────────────────────────────────────
    // operators
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn eq_compares_numbers_by_value_and_null_matches_missing() {
        let doc = json!({ "n": 1.0, "z": null });
        assert!(eval_filter(&field("n", CmpOp::Eq(json!(1))), &doc));
        assert!(eval_filter(&field("z", CmpOp::Eq(json!(null))), &doc));
        assert!(eval_filter(&field("missing", CmpOp::Eq(json!(null))), &doc));
        assert!(!eval_filter(&field("n", CmpOp::Eq(json!(null))), &doc));
    }

    #[test]
    fn ne_and_nin_match_missing_fields() {
        let doc = json!({ "tags": ["a", "b"] });
        assert!(eval_filter(&field("x", CmpOp::Ne(json!(1))), &doc));
        assert!(!eval_filter(&field("tags", CmpOp::Ne(json!("a"))), &doc));
        assert!(eval_filter(&field("tags", CmpOp::Nin(vec![json!("c")])), &doc));
        assert!(!eval_filter(&field("tags", CmpOp::Nin(vec![json!("b")])), &doc));
    }

    #[test]
    fn range_on_dates_uses_epoch_millis() {
        let doc = json!({ "at": "1970-01-02T00:00:00Z", "n": 5 });
        assert!(eval_filter(&field("at", CmpOp::Gt(json!(86_399_999))), &doc));
        assert!(eval_filter(&field("at", CmpOp::Lte(json!(86_400_000))), &doc));
        assert!(!eval_filter(&field("at", CmpOp::Lt(json!(86_400_000))), &doc));
        assert!(eval_filter(&field("n", CmpOp::Gte(json!(5))), &doc));
        assert!(!eval_filter(&field("n", CmpOp::Gt(json!("abc"))), &doc));
    }

    #[test]
    fn range_on_array_matches_any_element() {
        let doc = json!({ "scores": [1, 9] });
        assert!(eval_filter(&field("scores", CmpOp::Gt(json!(5))), &doc));
        assert!(!eval_filter(&field("scores", CmpOp::Gt(json!(9))), &doc));
    }

    #[test]
    fn exists_and_regex() {
        let doc = json!({ "a": { "b": null }, "name": "Jonas" });
        assert!(eval_filter(&field("a.b", CmpOp::Exists(true)), &doc));
        assert!(eval_filter(&field("a.c", CmpOp::Exists(false)), &doc));

        let re = CmpOp::Regex(Pattern::new("(?i)^jo").unwrap());
        assert!(eval_filter(&field("name", re.clone()), &doc));
        assert!(!eval_filter(&field("a.b", re), &doc));
    }

    #[test]
    fn and_or_combinators() {
        let doc = json!({ "a": 1, "b": 2 });
        let and = Filter::And(vec![field("a", CmpOp::Eq(json!(1))), field("b", CmpOp::Eq(json!(3)))]);
        let or = Filter::Or(vec![field("a", CmpOp::Eq(json!(1))), field("b", CmpOp::Eq(json!(3)))]);
        assert!(!eval_filter(&and, &doc));
        assert!(eval_filter(&or, &doc));
        assert!(eval_filter(&Filter::And(vec![]), &doc));
        assert!(!eval_filter(&Filter::Or(vec![]), &doc));
    }
}
