//! `ObjQuery` → Mongo-style filter document over the serialized `Obj`.

use serde_json::{json, Map, Value as Json};

use crate::catalog::FieldHints;
use crate::query::ast::{SortDirection, SortField};
use crate::query::compile::{resolve_query, sort_key, with_tiebreaker, SortKey};
use crate::query::{
    CompileOptions, Condition, Constraint, ObjQuery, QueryCompiler, QueryError, RangeOp, Target,
};

const RECORD_KEY: &str = "objRecord";

#[derive(Debug, Clone, Copy, Default)]
pub struct DocCompiler;

impl QueryCompiler for DocCompiler {
    type Filter = Json;
    type Sort = Vec<(String, i8)>;
    type Page = (Option<usize>, Option<usize>);

    fn transform_filter(
        &self,
        query: &ObjQuery,
        opts: &CompileOptions<'_>,
    ) -> Result<Json, QueryError> {
        let resolved = resolve_query(query, opts)?;

        let mut clauses: Vec<Json> = resolved.meta.iter().map(condition).collect();
        clauses.extend(resolved.and.iter().map(condition));
        if !resolved.or.is_empty() {
            clauses.push(json!({ "$or": resolved.or.iter().map(condition).collect::<Vec<_>>() }));
        }

        Ok(json!({ "$and": clauses }))
    }

    /// Record paths sort by their JSON value; hints are not needed here.
    fn transform_sort(
        &self,
        sort: &[SortField],
        _hints: Option<&FieldHints>,
    ) -> Result<Self::Sort, QueryError> {
        with_tiebreaker(sort)
            .iter()
            .map(|s| {
                let key = match sort_key(&s.field)? {
                    SortKey::Column(c) => c.doc_key().to_owned(),
                    SortKey::Record(path) => format!("{RECORD_KEY}.{path}"),
                };
                let dir = match s.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };
                Ok((key, dir))
            })
            .collect()
    }

    fn transform_pagination(&self, skip: usize, limit: Option<usize>) -> Self::Page {
        ((skip > 0).then_some(skip), limit)
    }
}

fn path(target: &Target) -> String {
    match target {
        Target::Record(p) => format!("{RECORD_KEY}.{p}"),
        Target::Column(c) => c.doc_key().to_owned(),
    }
}

fn condition(c: &Condition) -> Json {
    let ops = match (&c.target, &c.constraint) {
        // Columns are always present in the serialized form; "exists" means non-null.
        (Target::Column(_), Constraint::Exists(true)) => json!({ "$ne": null }),
        (Target::Column(_), Constraint::Exists(false)) => json!({ "$eq": null }),
        (_, constraint) => operators(constraint),
    };
    let mut m = Map::new();
    m.insert(path(&c.target), ops);
    Json::Object(m)
}

fn operators(constraint: &Constraint) -> Json {
    match constraint {
        Constraint::Eq(v) => json!({ "$eq": v }),
        Constraint::Ne(v) => json!({ "$ne": v }),
        Constraint::Cmp(op, n) => {
            let name = match op {
                RangeOp::Gt => "$gt",
                RangeOp::Gte => "$gte",
                RangeOp::Lt => "$lt",
                RangeOp::Lte => "$lte",
            };
            let mut m = Map::new();
            m.insert(name.to_owned(), json!(n));
            Json::Object(m)
        }
        Constraint::Between(lo, hi) => json!({ "$gte": lo, "$lte": hi }),
        Constraint::In(list) => json!({ "$in": list }),
        Constraint::NotIn(list) => json!({ "$nin": list }),
        Constraint::Like {
            pattern,
            case_sensitive,
        } => {
            if *case_sensitive {
                json!({ "$regex": pattern })
            } else {
                json!({ "$regex": pattern, "$options": "i" })
            }
        }
        Constraint::Exists(flag) => json!({ "$exists": flag }),
    }
}
