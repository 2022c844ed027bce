// crates/adapt/src/mql/query.rs
use super::ast::{Filter, FindOptions};
use super::eval::{eval_filter, get_field_value};
use serde_json::Value as Json;
use std::cmp::Ordering;

/// Result of a query: (document id, document JSON reference).
pub struct QueryResult<'a, Id> {
    pub id: Id,
    pub doc: &'a Json,
}

/// Full scan: evaluate, sort, then window.
pub fn execute<'a, Id, I>(docs: I, filter: &Filter, opts: &FindOptions) -> Vec<QueryResult<'a, Id>>
where
    I: IntoIterator<Item = (Id, &'a Json)>,
{
    let mut hits: Vec<QueryResult<'a, Id>> = docs
        .into_iter()
        .filter(|(_, doc)| eval_filter(filter, doc))
        .map(|(id, doc)| QueryResult { id, doc })
        .collect();

    apply_sort(&mut hits, &opts.sort);
    apply_skip_limit(hits, opts.skip, opts.limit)
}

/// Apply sort clauses in-place.
///
/// `sort` is a Vec<(field_path, dir)> where dir is 1 (asc) or -1 (desc).
fn apply_sort<Id>(docs: &mut [QueryResult<'_, Id>], sort: &[(String, i8)]) {
    if sort.is_empty() || docs.len() <= 1 {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, dir) in sort {
            let ord = compare_field(a.doc, b.doc, field);
            if ord != Ordering::Equal {
                return if *dir >= 0 { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// Rank used when two values have different JSON types. Missing and null
/// sort first, matching SQL's NULLS FIRST for ascending order.
fn type_rank(v: Option<&Json>) -> u8 {
    match v {
        None | Some(Json::Null) => 0,
        Some(Json::Number(_)) => 1,
        Some(Json::String(_)) => 2,
        Some(Json::Bool(_)) => 3,
        Some(Json::Array(_)) => 4,
        Some(Json::Object(_)) => 5,
    }
}

/// Compare a single field across two docs.
fn compare_field(a: &Json, b: &Json, field: &str) -> Ordering {
    use serde_json::Value as J;

    let va = get_field_value(a, field);
    let vb = get_field_value(b, field);

    match (va, vb) {
        (Some(J::Number(na)), Some(J::Number(nb))) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Some(J::String(sa)), Some(J::String(sb))) => sa.cmp(sb),
        (Some(J::Bool(ba)), Some(J::Bool(bb))) => ba.cmp(bb),
        (Some(x), Some(y))
            if (x.is_array() || x.is_object()) && type_rank(Some(x)) == type_rank(Some(y)) =>
        {
            x.to_string().cmp(&y.to_string())
        }
        _ => type_rank(va).cmp(&type_rank(vb)),
    }
}

/// Apply skip + limit to a vector, returning a new owned Vec.
fn apply_skip_limit<Id>(
    mut docs: Vec<QueryResult<'_, Id>>,
    skip: Option<usize>,
    limit: Option<usize>,
) -> Vec<QueryResult<'_, Id>> {
    let total = docs.len();
    let start = skip.unwrap_or(0).min(total);
    let end = match limit {
        Some(n) => start.saturating_add(n).min(total),
        None => total,
    };

    if start >= end {
        return Vec::new();
    }

    docs.drain(start..end).collect()
}
