//! `ObjQuery` → SeaQuery condition over `objs`, with `objRecord` predicates
//! answered by correlated `EXISTS` probes into `obj_parts`.

use domain::FieldType;
use sea_query::{Cond, Condition, Expr, Order, SimpleExpr, Value};
use serde_json::Value as Json;

use super::parts::{value_text, value_type};
use super::schema::Objs;
use crate::catalog::FieldHints;
use crate::query::ast::{like_pattern, SortDirection, SortField};
use crate::query::compile::{resolve_query, sort_key, with_tiebreaker, SortKey};
use crate::query::{
    Column, CompileOptions, Condition as Resolved, Constraint, ObjQuery, QueryCompiler,
    QueryError, RangeOp, Target,
};

const PART_PROBE: &str = "EXISTS (SELECT 1 FROM obj_parts p WHERE p.obj_id = objs.id AND p.path = ?";

/// Epoch milliseconds for ISO-8601 text, NULL otherwise.
const NUMBER_OR_DATE: &str = "COALESCE(p.value_number, CASE WHEN p.value_string GLOB ? \
     THEN ROUND((julianday(p.value_string) - 2440587.5) * 86400000.0) END)";

const DATE_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]*";

const INDEX_LIST_PROBE: &str =
    "EXISTS (SELECT 1 FROM json_each(objs.fields_to_index) WHERE json_each.value";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCompiler;

impl QueryCompiler for SqlCompiler {
    type Filter = Condition;
    type Sort = Vec<(SimpleExpr, Order)>;
    /// `(offset, limit)`.
    type Page = (u64, Option<u64>);

    fn transform_filter(
        &self,
        query: &ObjQuery,
        opts: &CompileOptions<'_>,
    ) -> Result<Condition, QueryError> {
        let resolved = resolve_query(query, opts)?;

        let mut cond = Cond::all();
        for c in resolved.meta.iter().chain(&resolved.and) {
            cond = cond.add(condition(c));
        }
        if !resolved.or.is_empty() {
            cond = cond.add(
                resolved
                    .or
                    .iter()
                    .fold(Cond::any(), |any, c| any.add(condition(c))),
            );
        }
        Ok(cond)
    }

    /// Record paths sort on the `obj_parts` column matching their indexed
    /// type; unknown paths sort as text.
    fn transform_sort(
        &self,
        sort: &[SortField],
        hints: Option<&FieldHints>,
    ) -> Result<Self::Sort, QueryError> {
        with_tiebreaker(sort)
            .iter()
            .map(|s| {
                let expr = match sort_key(&s.field)? {
                    SortKey::Column(c) => col(c).into(),
                    SortKey::Record(path) => {
                        let column = match hints.and_then(|h| h.type_of(path)) {
                            Some(FieldType::Number) => "value_number",
                            Some(FieldType::Boolean) => "value_boolean",
                            _ => "value_string",
                        };
                        Expr::cust_with_values(
                            format!(
                                "(SELECT p.{column} FROM obj_parts p \
                                 WHERE p.obj_id = objs.id AND p.path = ? AND p.exact = 1)"
                            ),
                            [path.to_owned()],
                        )
                    }
                };
                let order = match s.direction {
                    SortDirection::Asc => Order::Asc,
                    SortDirection::Desc => Order::Desc,
                };
                Ok((expr, order))
            })
            .collect()
    }

    fn transform_pagination(&self, skip: usize, limit: Option<usize>) -> Self::Page {
        (skip as u64, limit.map(|n| n as u64))
    }
}

fn col(c: Column) -> Expr {
    Expr::col((Objs::Table, Objs::from(c)))
}

/// Bind value for a JSON scalar; containers bind as their JSON text.
pub fn json_value(v: &Json) -> Value {
    match v {
        Json::Null => Value::String(None),
        Json::Bool(b) => (*b).into(),
        Json::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or(f64::NAN).into(),
        },
        Json::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

fn condition(c: &Resolved) -> Condition {
    match &c.target {
        Target::Column(Column::FieldsToIndex) => index_list(&c.constraint),
        Target::Column(column) => column_condition(*column, &c.constraint),
        Target::Record(path) => record_condition(path, &c.constraint),
    }
}

fn cmp(e: Expr, op: RangeOp, n: f64) -> SimpleExpr {
    match op {
        RangeOp::Gt => e.gt(n),
        RangeOp::Gte => e.gte(n),
        RangeOp::Lt => e.lt(n),
        RangeOp::Lte => e.lte(n),
    }
}

fn op_sql(op: RangeOp) -> &'static str {
    match op {
        RangeOp::Gt => ">",
        RangeOp::Gte => ">=",
        RangeOp::Lt => "<",
        RangeOp::Lte => "<=",
    }
}

fn column_condition(column: Column, constraint: &Constraint) -> Condition {
    let c = || col(column);
    let values = |list: &[Json]| list.iter().map(json_value).collect::<Vec<_>>();
    let cond = Cond::all();
    match constraint {
        Constraint::Eq(Json::Null) | Constraint::Exists(false) => cond.add(c().is_null()),
        Constraint::Ne(Json::Null) | Constraint::Exists(true) => cond.add(c().is_not_null()),
        Constraint::Eq(v) => cond.add(c().eq(json_value(v))),
        Constraint::Ne(v) => cond.add(c().is_not(json_value(v))),
        Constraint::Cmp(op, n) => cond.add(cmp(c(), *op, *n)),
        Constraint::Between(lo, hi) => cond.add(c().between(*lo, *hi)),
        Constraint::In(list) => cond.add(c().is_in(values(list))),
        Constraint::NotIn(list) => cond.add(
            Cond::any()
                .add(c().is_null())
                .add(c().is_not_in(values(list))),
        ),
        Constraint::Like {
            pattern,
            case_sensitive,
        } => cond.add(Expr::cust_with_values(
            format!("objs.{} REGEXP ?", Objs::from(column).name()),
            [like_pattern(pattern, *case_sensitive)],
        )),
    }
}

/// `fieldsToIndex` is a JSON array column; membership goes through `json_each`.
fn index_list(constraint: &Constraint) -> Condition {
    let member = |list: &[Json]| {
        let marks = vec!["?"; list.len()].join(", ");
        Expr::cust_with_values(
            format!("{INDEX_LIST_PROBE} IN ({marks}))"),
            list.iter().map(json_value),
        )
    };
    match constraint {
        Constraint::Eq(Json::Null) | Constraint::Exists(false) => {
            Cond::all().add(col(Column::FieldsToIndex).is_null())
        }
        Constraint::Ne(Json::Null) | Constraint::Exists(true) => {
            Cond::all().add(col(Column::FieldsToIndex).is_not_null())
        }
        Constraint::Eq(v) => Cond::all().add(member(std::slice::from_ref(v))),
        Constraint::Ne(v) => Cond::all().add(member(std::slice::from_ref(v)).not()),
        Constraint::In(list) => Cond::all().add(member(list)),
        Constraint::NotIn(list) => Cond::all().add(member(list).not()),
        other => column_condition(Column::FieldsToIndex, other),
    }
}

fn probe(path: &str, clause: &str, values: Vec<Value>) -> SimpleExpr {
    let sql = if clause.is_empty() {
        format!("{PART_PROBE})")
    } else {
        format!("{PART_PROBE} AND {clause})")
    };
    let mut binds = vec![Value::from(path.to_owned())];
    binds.extend(values);
    Expr::cust_with_values(sql, binds)
}

/// Any reachable value at `path` equals `v`; `null` also matches absence.
fn record_eq(path: &str, v: &Json) -> Condition {
    let typed = |column: &str, bind: Value| {
        probe(
            path,
            &format!("p.value_type = ? AND p.{column} = ?"),
            vec![value_type(v).into(), bind],
        )
    };
    match v {
        Json::Null => Cond::any()
            .add(probe(path, "p.value_type = ?", vec!["null".into()]))
            .add(probe(path, "", vec![]).not()),
        Json::Bool(b) => Cond::all().add(typed("value_boolean", (*b).into())),
        Json::Number(n) => Cond::all().add(typed(
            "value_number",
            n.as_f64().unwrap_or(f64::NAN).into(),
        )),
        other => Cond::all().add(typed("value_string", value_text(other).into())),
    }
}

fn record_range(path: &str, op: RangeOp, n: f64) -> SimpleExpr {
    probe(
        path,
        &format!("{NUMBER_OR_DATE} {} ?", op_sql(op)),
        vec![DATE_GLOB.into(), n.into()],
    )
}

fn record_condition(path: &str, constraint: &Constraint) -> Condition {
    match constraint {
        Constraint::Eq(v) => record_eq(path, v),
        Constraint::Ne(v) => record_eq(path, v).not(),
        Constraint::In(list) => list
            .iter()
            .fold(Cond::any(), |any, v| any.add(record_eq(path, v))),
        Constraint::NotIn(list) => list
            .iter()
            .fold(Cond::any(), |any, v| any.add(record_eq(path, v)))
            .not(),
        Constraint::Cmp(op, n) => Cond::all().add(record_range(path, *op, *n)),
        Constraint::Between(lo, hi) => Cond::all()
            .add(record_range(path, RangeOp::Gte, *lo))
            .add(record_range(path, RangeOp::Lte, *hi)),
        Constraint::Like {
            pattern,
            case_sensitive,
        } => Cond::all().add(probe(
            path,
            "p.value_type = ? AND p.value_string REGEXP ?",
            vec!["string".into(), like_pattern(pattern, *case_sensitive).into()],
        )),
        Constraint::Exists(true) => Cond::all().add(probe(path, "", vec![])),
        Constraint::Exists(false) => Cond::all().add(probe(path, "", vec![]).not()),
    }
}
