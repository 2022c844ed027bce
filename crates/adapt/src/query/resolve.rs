//! Reference-date resolution of an `ObjQuery` into backend-neutral
//! constraints. Both compilers consume this form so the coercion rules live
//! in one place.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use super::ast::{
    DeletedAtQuery, NumberMetaQuery, ObjQuery, Predicate, RangeValue, StringMetaQuery,
};
use super::coerce::{resolve, resolve_absolute, Bound};

/// Top-level `Obj` columns addressable by meta queries and sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    AppId,
    GroupId,
    Tag,
    CreatedAt,
    CreatedBy,
    UpdatedAt,
    UpdatedBy,
    DeletedAt,
    DeletedBy,
    DeletedByType,
    ShouldIndex,
    FieldsToIndex,
}

impl Column {
    /// Key in the serialized (document) form of an `Obj`.
    pub fn doc_key(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::AppId => "appId",
            Column::GroupId => "groupId",
            Column::Tag => "tag",
            Column::CreatedAt => "createdAt",
            Column::CreatedBy => "createdBy",
            Column::UpdatedAt => "updatedAt",
            Column::UpdatedBy => "updatedBy",
            Column::DeletedAt => "deletedAt",
            Column::DeletedBy => "deletedBy",
            Column::DeletedByType => "deletedByType",
            Column::ShouldIndex => "shouldIndex",
            Column::FieldsToIndex => "fieldsToIndex",
        }
    }

    /// Columns a caller may sort by.
    pub fn sortable(key: &str) -> Option<Self> {
        Some(match key {
            "id" => Column::Id,
            "appId" => Column::AppId,
            "groupId" => Column::GroupId,
            "tag" => Column::Tag,
            "createdAt" => Column::CreatedAt,
            "createdBy" => Column::CreatedBy,
            "updatedAt" => Column::UpdatedAt,
            "updatedBy" => Column::UpdatedBy,
            "deletedAt" => Column::DeletedAt,
            _ => return None,
        })
    }

    pub fn is_timestamp(self) -> bool {
        matches!(self, Column::CreatedAt | Column::UpdatedAt | Column::DeletedAt)
    }
}

/// Prefix for sort keys that address `objRecord`.
pub const RECORD_PREFIX: &str = "objRecord.";

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Dotted path inside `objRecord`.
    Record(String),
    Column(Column),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `Eq(Null)` also matches a missing field.
    Eq(Json),
    Ne(Json),
    Cmp(RangeOp, f64),
    /// Inclusive on both ends.
    Between(f64, f64),
    In(Vec<Json>),
    NotIn(Vec<Json>),
    Like { pattern: String, case_sensitive: bool },
    Exists(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub target: Target,
    pub constraint: Constraint,
}

impl Condition {
    pub fn column(column: Column, constraint: Constraint) -> Self {
        Self {
            target: Target::Column(column),
            constraint,
        }
    }

    pub fn record(path: &str, constraint: Constraint) -> Self {
        Self {
            target: Target::Record(path.to_owned()),
            constraint,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions<'a> {
    pub tag: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub include_deleted: bool,
}

/// Flat, resolved form: `all(meta) AND all(and) AND any(or)`.
/// An empty `or` list places no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedQuery {
    pub meta: Vec<Condition>,
    pub and: Vec<Condition>,
    pub or: Vec<Condition>,
}

impl ResolvedQuery {
    pub fn new(query: &ObjQuery, opts: ResolveOptions<'_>) -> Self {
        let mut meta = vec![Condition::column(
            Column::AppId,
            Constraint::Eq(Json::String(query.app_id.clone())),
        )];
        if let Some(tag) = opts.tag {
            meta.push(Condition::column(
                Column::Tag,
                Constraint::Eq(Json::String(tag.to_owned())),
            ));
        }
        if !opts.include_deleted {
            meta.push(Condition::column(Column::DeletedAt, Constraint::Eq(Json::Null)));
        }

        let m = &query.meta_query;
        strings(&mut meta, Column::Id, m.id.as_ref());
        numbers(&mut meta, Column::CreatedAt, m.created_at.as_ref(), opts.now);
        numbers(&mut meta, Column::UpdatedAt, m.updated_at.as_ref(), opts.now);
        strings(&mut meta, Column::CreatedBy, m.created_by.as_ref());
        strings(&mut meta, Column::UpdatedBy, m.updated_by.as_ref());

        let t = &query.top_level_fields;
        if let Some(flag) = t.should_index {
            meta.push(Condition::column(Column::ShouldIndex, Constraint::Eq(Json::Bool(flag))));
        }
        strings(&mut meta, Column::FieldsToIndex, t.fields_to_index.as_ref());
        strings(&mut meta, Column::Tag, t.tag.as_ref());
        strings(&mut meta, Column::GroupId, t.group_id.as_ref());
        deleted_at(&mut meta, t.deleted_at.as_ref(), opts.now);
        strings(&mut meta, Column::DeletedBy, t.deleted_by.as_ref());
        strings(&mut meta, Column::DeletedByType, t.deleted_by_type.as_ref());

        Self {
            meta,
            and: resolve_all(&query.part_query.and, opts.now),
            or: resolve_all(&query.part_query.or, opts.now),
        }
    }
}

fn resolve_all(predicates: &[Predicate], now: DateTime<Utc>) -> Vec<Condition> {
    predicates.iter().filter_map(|p| predicate(p, now)).collect()
}

/// `None` when the predicate contributes nothing (unresolvable operand).
pub fn predicate(p: &Predicate, now: DateTime<Utc>) -> Option<Condition> {
    let range = |op, v: &RangeValue, bound| resolve(v, bound, now).map(|n| Constraint::Cmp(op, n));

    let constraint = match p {
        Predicate::Eq { value, .. } => Some(Constraint::Eq(value.clone())),
        Predicate::Neq { value, .. } => Some(Constraint::Ne(value.clone())),
        Predicate::Gt { value, .. } => range(RangeOp::Gt, value, Bound::Lower),
        Predicate::Gte { value, .. } => range(RangeOp::Gte, value, Bound::Lower),
        Predicate::Lt { value, .. } => range(RangeOp::Lt, value, Bound::Upper),
        Predicate::Lte { value, .. } => range(RangeOp::Lte, value, Bound::Upper),
        Predicate::Between { value: (lo, hi), .. } => {
            match (resolve(lo, Bound::Lower, now), resolve(hi, Bound::Upper, now)) {
                (Some(lo), Some(hi)) => Some(Constraint::Between(lo, hi)),
                _ => None,
            }
        }
        Predicate::In { value, .. } => Some(Constraint::In(value.clone())),
        Predicate::NotIn { value, .. } => Some(Constraint::NotIn(value.clone())),
        Predicate::Like {
            value,
            case_sensitive,
            ..
        } => Some(Constraint::Like {
            pattern: value.clone(),
            case_sensitive: *case_sensitive,
        }),
        Predicate::Exists { value, .. } => Some(Constraint::Exists(*value)),
    }?;
    Some(Condition::record(p.field(), constraint))
}

fn strings(out: &mut Vec<Condition>, column: Column, q: Option<&StringMetaQuery>) {
    let Some(q) = q else { return };
    let text = |s: &String| Json::String(s.clone());
    if let Some(v) = &q.eq {
        out.push(Condition::column(column, Constraint::Eq(text(v))));
    }
    if let Some(v) = &q.neq {
        out.push(Condition::column(column, Constraint::Ne(text(v))));
    }
    if let Some(list) = &q.in_list {
        out.push(Condition::column(column, Constraint::In(list.iter().map(text).collect())));
    }
    if let Some(list) = &q.not_in {
        out.push(Condition::column(column, Constraint::NotIn(list.iter().map(text).collect())));
    }
}

fn numbers(out: &mut Vec<Condition>, column: Column, q: Option<&NumberMetaQuery>, now: DateTime<Utc>) {
    let Some(q) = q else { return };
    if let Some(v) = q.eq.as_ref().and_then(absolute) {
        out.push(Condition::column(column, Constraint::Eq(v)));
    }
    if let Some(v) = q.neq.as_ref().and_then(absolute) {
        out.push(Condition::column(column, Constraint::Ne(v)));
    }
    if let Some(list) = q.in_list.as_deref().map(absolute_list).filter(|l| !l.is_empty()) {
        out.push(Condition::column(column, Constraint::In(list)));
    }
    if let Some(list) = q.not_in.as_deref().map(absolute_list).filter(|l| !l.is_empty()) {
        out.push(Condition::column(column, Constraint::NotIn(list)));
    }

    let bounds = [
        (RangeOp::Gt, &q.gt, Bound::Lower),
        (RangeOp::Gte, &q.gte, Bound::Lower),
        (RangeOp::Lt, &q.lt, Bound::Upper),
        (RangeOp::Lte, &q.lte, Bound::Upper),
    ];
    for (op, value, bound) in bounds {
        if let Some(n) = value.as_ref().and_then(|v| resolve(v, bound, now)) {
            out.push(Condition::column(column, Constraint::Cmp(op, n)));
        }
    }
    if let Some((lo, hi)) = &q.between {
        if let (Some(lo), Some(hi)) = (resolve(lo, Bound::Lower, now), resolve(hi, Bound::Upper, now)) {
            out.push(Condition::column(column, Constraint::Between(lo, hi)));
        }
    }
}

fn absolute(v: &RangeValue) -> Option<Json> {
    resolve_absolute(v).map(Json::from)
}

fn absolute_list(list: &[RangeValue]) -> Vec<Json> {
    list.iter().filter_map(absolute).collect()
}

fn deleted_at(out: &mut Vec<Condition>, q: Option<&DeletedAtQuery>, now: DateTime<Utc>) {
    let Some(q) = q else { return };
    if let Some(flag) = q.exists {
        out.push(Condition::column(Column::DeletedAt, Constraint::Exists(flag)));
    }
    numbers(out, Column::DeletedAt, Some(&q.range), now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::DurationSpec;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(10 * 86_400_000).unwrap()
    }

    fn opts() -> ResolveOptions<'static> {
        ResolveOptions {
            tag: Some("log"),
            now: now(),
            include_deleted: false,
        }
    }

    #[test]
    fn scoping_conditions_come_first() {
        let r = ResolvedQuery::new(&ObjQuery::for_app("app"), opts());
        assert_eq!(
            r.meta,
            vec![
                Condition::column(Column::AppId, Constraint::Eq(json!("app"))),
                Condition::column(Column::Tag, Constraint::Eq(json!("log"))),
                Condition::column(Column::DeletedAt, Constraint::Eq(Json::Null)),
            ]
        );

        let all = ResolvedQuery::new(
            &ObjQuery::for_app("app"),
            ResolveOptions {
                tag: None,
                include_deleted: true,
                ..opts()
            },
        );
        assert_eq!(all.meta.len(), 1);
    }

    #[test]
    fn unresolvable_predicates_are_dropped() {
        let q = ObjQuery::for_app("app")
            .and(Predicate::Gt {
                field: "at".into(),
                value: RangeValue::Text("not a date".into()),
            })
            .and(Predicate::Between {
                field: "at".into(),
                value: (RangeValue::Number(1.0), RangeValue::Text("??".into())),
            })
            .and(Predicate::eq("kept", 1));
        let r = ResolvedQuery::new(&q, opts());
        assert_eq!(r.and, vec![Condition::record("kept", Constraint::Eq(json!(1)))]);
    }

    #[test]
    fn between_uses_lower_then_upper_rule() {
        let d = RangeValue::Duration(DurationSpec {
            days: Some(1),
            ..Default::default()
        });
        let p = Predicate::Between {
            field: "at".into(),
            value: (d.clone(), d),
        };
        let c = predicate(&p, now()).unwrap();
        assert_eq!(
            c.constraint,
            Constraint::Between((11 * 86_400_000) as f64, (9 * 86_400_000) as f64)
        );
    }

    #[test]
    fn number_meta_ignores_durations_for_equality() {
        let q = ObjQuery {
            meta_query: crate::query::ast::MetaQuery {
                created_at: Some(NumberMetaQuery {
                    eq: Some(RangeValue::Duration(DurationSpec::default())),
                    lt: Some(RangeValue::Duration(DurationSpec {
                        hours: Some(1),
                        ..Default::default()
                    })),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..ObjQuery::for_app("app")
        };
        let r = ResolvedQuery::new(&q, opts());
        let created: Vec<_> = r
            .meta
            .iter()
            .filter(|c| c.target == Target::Column(Column::CreatedAt))
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].constraint,
            Constraint::Cmp(RangeOp::Lt, (10 * 86_400_000 - 3_600_000) as f64)
        );
    }

    #[test]
    fn sortable_columns() {
        assert_eq!(Column::sortable("createdAt"), Some(Column::CreatedAt));
        assert_eq!(Column::sortable("objRecord.x"), None);
        assert_eq!(Column::sortable("fieldsToIndex"), None);
    }
}
