// crates/adapt/src/mql/parser.rs
use super::ast::{CmpOp, FieldExpr, Filter, FindOptions, Pattern};
use crate::query::QueryError;
use serde_json::{Map, Value as Json};

/// Parse a Mongo-style JSON filter into a Filter AST.
pub fn parse_filter(json: &Json) -> Result<Filter, QueryError> {
    let Json::Object(map) = json else {
        return Err(QueryError::InvalidFilter(
            "top-level filter must be an object".into(),
        ));
    };

    let mut filters = Vec::new();
    for (k, v) in map {
        match k.as_str() {
            "$and" => filters.push(Filter::And(parse_list(k, v)?)),
            "$or" => filters.push(Filter::Or(parse_list(k, v)?)),
            // field expression, implicit $eq or operator object
            _ => filters.push(parse_field_expr(k, v)?),
        }
    }

    Ok(match filters.len() {
        1 => filters.remove(0),
        _ => Filter::And(filters),
    })
}

fn parse_list(op: &str, value: &Json) -> Result<Vec<Filter>, QueryError> {
    match value {
        Json::Array(arr) => arr.iter().map(parse_filter).collect(),
        _ => Err(QueryError::InvalidFilter(format!(
            "{op} value must be an array"
        ))),
    }
}

fn parse_field_expr(path: &str, v: &Json) -> Result<Filter, QueryError> {
    let field = |op| {
        Filter::Field(FieldExpr {
            path: path.to_string(),
            op,
        })
    };

    // Shorthand: { field: value } → Eq
    let Json::Object(obj) = v else {
        return Ok(field(CmpOp::Eq(v.clone())));
    };

    if obj.is_empty() {
        return Err(QueryError::InvalidFilter(format!(
            "empty operator object for field {path}"
        )));
    }

    let mut and_ops = Vec::new();
    if let Some(pattern) = obj.get("$regex") {
        and_ops.push(field(parse_regex(pattern, obj)?));
    } else if obj.contains_key("$options") {
        return Err(QueryError::InvalidFilter(format!(
            "$options without $regex for field {path}"
        )));
    }

    for (op_name, op_val) in obj {
        if op_name == "$regex" || op_name == "$options" {
            continue;
        }
        and_ops.push(field(parse_cmp_op(op_name, op_val)?));
    }

    Ok(match and_ops.len() {
        1 => and_ops.remove(0),
        _ => Filter::And(and_ops),
    })
}

fn parse_regex(pattern: &Json, obj: &Map<String, Json>) -> Result<CmpOp, QueryError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| QueryError::InvalidFilter("$regex expects string".into()))?;
    let options = match obj.get("$options") {
        None => "",
        Some(Json::String(s)) => s.as_str(),
        Some(_) => return Err(QueryError::InvalidFilter("$options expects string".into())),
    };

    let mut flags = String::new();
    for c in options.chars() {
        match c {
            'i' | 'm' | 's' | 'x' => flags.push(c),
            other => {
                return Err(QueryError::InvalidOperator(format!(
                    "unsupported regex option {other}"
                )))
            }
        }
    }
    let full = if flags.is_empty() {
        pattern.to_owned()
    } else {
        format!("(?{flags}){pattern}")
    };

    Pattern::new(&full)
        .map(CmpOp::Regex)
        .map_err(|source| QueryError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })
}

fn parse_cmp_op(op_name: &str, value: &Json) -> Result<CmpOp, QueryError> {
    use CmpOp::*;

    let list = |name: &str| {
        value
            .as_array()
            .cloned()
            .ok_or_else(|| QueryError::InvalidFilter(format!("{name} expects array")))
    };

    match op_name {
        "$eq" => Ok(Eq(value.clone())),
        "$ne" => Ok(Ne(value.clone())),
        "$gt" => Ok(Gt(value.clone())),
        "$gte" => Ok(Gte(value.clone())),
        "$lt" => Ok(Lt(value.clone())),
        "$lte" => Ok(Lte(value.clone())),
        "$in" => list("$in").map(In),
        "$nin" => list("$nin").map(Nin),
        "$exists" => value
            .as_bool()
            .map(Exists)
            .ok_or_else(|| QueryError::InvalidFilter("$exists expects boolean".into())),
        _ => Err(QueryError::InvalidOperator(format!(
            "unsupported operator {op_name}"
        ))),
    }
}

/// Parse FindOptions from a JSON object.
///
/// {
///   sort: { "field": 1, "other": -1 },
///   limit: 10,
///   skip: 5
/// }
pub fn parse_find_options(json: &Json) -> Result<FindOptions, QueryError> {
    let mut opts = FindOptions::default();

    let Json::Object(obj) = json else {
        return Ok(opts);
    };

    if let Some(sort_val) = obj.get("sort") {
        let sort_obj = sort_val.as_object().ok_or_else(|| {
            QueryError::InvalidSort("sort must be object { field: 1|-1 }".into())
        })?;
        for (field, dir_val) in sort_obj {
            let dir = match dir_val.as_i64() {
                Some(1) => 1,
                Some(-1) => -1,
                _ => return Err(QueryError::InvalidSort("sort direction must be 1 or -1".into())),
            };
            opts.sort.push((field.clone(), dir));
        }
    }

    if let Some(n) = obj.get("limit").and_then(Json::as_u64) {
        opts.limit = Some(n as usize);
    }
    if let Some(n) = obj.get("skip").and_then(Json::as_u64) {
        if n > 0 {
            opts.skip = Some(n as usize);
        }
    }

    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Helper to extract a single FieldExpr from a Filter::Field, panic otherwise.
    fn as_field(filter: &Filter) -> &FieldExpr {
        match filter {
            Filter::Field(fe) => fe,
            other => panic!("expected Filter::Field, got: {:?}", other),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // parse_filter – basic / implicit $eq
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn parse_filter_implicit_eq_single_field() {
        let f = parse_filter(&json!({ "tag": "log" })).expect("parse_filter failed");
        let fe = as_field(&f);
        assert_eq!(fe.path, "tag");
        assert_eq!(fe.op, CmpOp::Eq(json!("log")));
    }

    #[test]
    fn parse_filter_multiple_fields_become_and() {
        let f = parse_filter(&json!({ "tag": "log", "appId": "a" })).unwrap();
        match f {
            Filter::And(filters) => {
                let paths: Vec<_> = filters.iter().map(|f| as_field(f).path.clone()).collect();
                assert!(paths.contains(&"tag".to_string()));
                assert!(paths.contains(&"appId".to_string()));
            }
            other => panic!("expected top-level And, got: {:?}", other),
        }
    }

    #[test]
    fn parse_filter_empty_object_matches_all() {
        assert_eq!(parse_filter(&json!({})).unwrap(), Filter::And(vec![]));
    }

    #[test]
    fn parse_filter_top_level_must_be_object() {
        let err = parse_filter(&json!(["not-an-object"])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidFilter(_)));
    }

    // ─────────────────────────────────────────────────────────────
    // $and / $or handling
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn parse_filter_and_or_nested() {
        let f = parse_filter(&json!({
            "$and": [
                { "tag": "log" },
                { "$or": [{ "objRecord.kind": "a" }, { "objRecord.kind": "b" }] }
            ]
        }))
        .unwrap();

        match f {
            Filter::And(and_list) => {
                assert_eq!(and_list.len(), 2);
                assert_eq!(as_field(&and_list[0]).path, "tag");
                assert!(matches!(&and_list[1], Filter::Or(or) if or.len() == 2));
            }
            other => panic!("expected top-level And, got: {:?}", other),
        }
    }

    #[test]
    fn parse_logical_values_must_be_arrays() {
        for bad in [json!({ "$and": { "a": 1 } }), json!({ "$or": 1 })] {
            let err = parse_filter(&bad).unwrap_err();
            assert!(matches!(err, QueryError::InvalidFilter(_)));
        }
    }

    // ─────────────────────────────────────────────────────────────
    // operator objects
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn operator_object_with_two_ops_becomes_and() {
        let f = parse_filter(&json!({ "n": { "$gte": 1, "$lte": 5 } })).unwrap();
        match f {
            Filter::And(ops) => {
                assert_eq!(ops.len(), 2);
                let ops: Vec<_> = ops.iter().map(|f| as_field(f).op.clone()).collect();
                assert!(ops.contains(&CmpOp::Gte(json!(1))));
                assert!(ops.contains(&CmpOp::Lte(json!(5))));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn regex_with_options() {
        let f = parse_filter(&json!({ "name": { "$regex": "^jo", "$options": "i" } })).unwrap();
        match &as_field(&f).op {
            CmpOp::Regex(p) => {
                assert_eq!(p.as_str(), "(?i)^jo");
                assert!(p.is_match("JOHN"));
            }
            other => panic!("expected Regex, got {other:?}"),
        }
    }

    #[test]
    fn regex_errors() {
        assert!(matches!(
            parse_filter(&json!({ "a": { "$regex": "(" } })),
            Err(QueryError::InvalidPattern { .. })
        ));
        assert!(matches!(
            parse_filter(&json!({ "a": { "$options": "i" } })),
            Err(QueryError::InvalidFilter(_))
        ));
        assert!(matches!(
            parse_filter(&json!({ "a": { "$regex": "x", "$options": "g" } })),
            Err(QueryError::InvalidOperator(_))
        ));
    }

    #[test]
    fn in_nin_exists_shapes() {
        let f = parse_filter(&json!({ "a": { "$in": [1, 2] } })).unwrap();
        assert_eq!(as_field(&f).op, CmpOp::In(vec![json!(1), json!(2)]));

        assert!(parse_filter(&json!({ "a": { "$nin": 1 } })).is_err());
        assert!(parse_filter(&json!({ "a": { "$exists": 1 } })).is_err());
        assert!(matches!(
            parse_filter(&json!({ "a": { "$size": 1 } })),
            Err(QueryError::InvalidOperator(_))
        ));
        assert!(parse_filter(&json!({ "a": {} })).is_err());
    }

    // ─────────────────────────────────────────────────────────────
    // parse_find_options
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn find_options_parse() {
        let o = parse_find_options(&json!({ "sort": { "createdAt": -1 }, "limit": 10, "skip": 5 }))
            .unwrap();
        assert_eq!(o.sort, vec![("createdAt".to_string(), -1)]);
        assert_eq!(o.limit, Some(10));
        assert_eq!(o.skip, Some(5));
    }

    #[test]
    fn find_options_zero_limit_is_kept() {
        let o = parse_find_options(&json!({ "limit": 0, "skip": 0 })).unwrap();
        assert_eq!(o.limit, Some(0));
        assert_eq!(o.skip, None);
    }

    #[test]
    fn find_options_bad_sort() {
        assert!(parse_find_options(&json!({ "sort": { "a": 2 } })).is_err());
        assert!(parse_find_options(&json!({ "sort": ["a"] })).is_err());
        assert_eq!(parse_find_options(&json!(null)).unwrap(), FindOptions::default());
    }
}
