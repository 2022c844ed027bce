//! Statement builders and row codecs for the three tables.

use chrono::{DateTime, TimeZone, Utc};
use domain::{DeleteStamp, FieldType, Obj, ObjField};
use sea_query::{
    Cond, Condition, Expr, OnConflict, Order, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder,
};
use std::collections::BTreeSet;

use super::parts::{self, PartRow};
use super::schema::{ObjFields, ObjParts, Objs};
use super::{SqlRow, SqlValue, Stmt};
use crate::storage::{Result, ScanCursor, StorageError};

/// Rows per multi-row INSERT, kept well under SQLite's bind limit.
pub const OBJS_CHUNK: usize = 50;
pub const PARTS_CHUNK: usize = 500;

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn build_err(e: sea_query::error::Error) -> StorageError {
    StorageError::InvalidArgument(e.to_string())
}

fn obj_values(o: &Obj) -> Result<Vec<SimpleExpr>> {
    let fields_to_index = o
        .fields_to_index
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok(vec![
        o.id.clone().into(),
        o.app_id.clone().into(),
        o.group_id.clone().into(),
        o.tag.clone().into(),
        serde_json::to_string(&o.obj_record)?.into(),
        ms(o.created_at).into(),
        o.created_by.clone().into(),
        o.created_by_type.clone().into(),
        ms(o.updated_at).into(),
        o.updated_by.clone().into(),
        o.updated_by_type.clone().into(),
        o.deleted_at.map(ms).into(),
        o.deleted_by.clone().into(),
        o.deleted_by_type.clone().into(),
        o.should_index.into(),
        fields_to_index.into(),
    ])
}

fn parts_insert(obj_id: &str, rows: &[PartRow]) -> Result<Vec<Stmt>> {
    rows.chunks(PARTS_CHUNK)
        .map(|chunk| {
            let mut ins = Query::insert();
            ins.into_table(ObjParts::Table).columns([
                ObjParts::ObjId,
                ObjParts::Path,
                ObjParts::Exact,
                ObjParts::ValueType,
                ObjParts::ValueString,
                ObjParts::ValueNumber,
                ObjParts::ValueBoolean,
            ]);
            for r in chunk {
                ins.values([
                    obj_id.to_owned().into(),
                    r.path.clone().into(),
                    r.exact.into(),
                    r.value_type.into(),
                    r.value_string.clone().into(),
                    r.value_number.into(),
                    r.value_boolean.into(),
                ])
                .map_err(build_err)?;
            }
            Ok(Stmt::built(ins.build(SqliteQueryBuilder)))
        })
        .collect()
}

fn delete_parts(ids: &[String]) -> Stmt {
    Stmt::built(
        Query::delete()
            .from_table(ObjParts::Table)
            .and_where(Expr::col(ObjParts::ObjId).is_in(ids.iter().cloned()))
            .build(SqliteQueryBuilder),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// objs
// ─────────────────────────────────────────────────────────────────────────────

pub fn insert_objs(objs: &[Obj]) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();
    for chunk in objs.chunks(OBJS_CHUNK) {
        let mut ins = Query::insert();
        ins.into_table(Objs::Table).columns(Objs::ROW);
        for o in chunk {
            ins.values(obj_values(o)?).map_err(build_err)?;
        }
        stmts.push(Stmt::built(ins.build(SqliteQueryBuilder)));
    }
    for o in objs {
        stmts.extend(parts_insert(&o.id, &parts::rows(&o.obj_record))?);
    }
    Ok(stmts)
}

/// One UPDATE per object, first in the batch, followed by the rewritten
/// parts. The caller counts rows from the first `objs.len()` results.
pub fn replace_objs(objs: &[Obj]) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::with_capacity(objs.len() + 2);
    for o in objs {
        let values = obj_values(o)?;
        let assignments = Objs::ROW.into_iter().zip(values).skip(1);
        stmts.push(Stmt::built(
            Query::update()
                .table(Objs::Table)
                .values(assignments)
                .and_where(Expr::col(Objs::Id).eq(o.id.clone()))
                .build(SqliteQueryBuilder),
        ));
    }
    if objs.is_empty() {
        return Ok(stmts);
    }

    let ids: Vec<String> = objs.iter().map(|o| o.id.clone()).collect();
    stmts.push(delete_parts(&ids));
    for o in objs {
        stmts.extend(parts_insert(&o.id, &parts::rows(&o.obj_record))?);
    }
    Ok(stmts)
}

/// Soft delete; rows already carrying a stamp are left as they are.
pub fn mark_deleted(ids: &[String], stamp: &DeleteStamp) -> Stmt {
    Stmt::built(
        Query::update()
            .table(Objs::Table)
            .values([
                (Objs::DeletedAt, ms(stamp.at).into()),
                (Objs::DeletedBy, stamp.by.clone().into()),
                (Objs::DeletedByType, stamp.by_type.clone().into()),
            ])
            .and_where(Expr::col(Objs::Id).is_in(ids.iter().cloned()))
            .and_where(Expr::col(Objs::DeletedAt).is_null())
            .build(SqliteQueryBuilder),
    )
}

/// Parts first, then the rows; the second count is the one that matters.
pub fn remove_objs(ids: &[String]) -> Vec<Stmt> {
    vec![
        delete_parts(ids),
        Stmt::built(
            Query::delete()
                .from_table(Objs::Table)
                .and_where(Expr::col(Objs::Id).is_in(ids.iter().cloned()))
                .build(SqliteQueryBuilder),
        ),
    ]
}

fn select_row() -> SelectStatement {
    Query::select()
        .columns(Objs::ROW.map(|c| (Objs::Table, c)))
        .from(Objs::Table)
        .to_owned()
}

/// SQLite needs a LIMIT whenever OFFSET is present.
fn window(select: &mut SelectStatement, offset: u64, limit: Option<u64>) {
    match limit {
        Some(n) => {
            select.limit(n);
        }
        None if offset > 0 => {
            select.limit(i64::MAX as u64);
        }
        None => {}
    }
    if offset > 0 {
        select.offset(offset);
    }
}

pub fn select_objs(
    filter: Condition,
    sort: Vec<(SimpleExpr, Order)>,
    (offset, limit): (u64, Option<u64>),
) -> Stmt {
    let mut select = select_row();
    select.cond_where(filter);
    for (expr, order) in sort {
        select.order_by_expr(expr, order);
    }
    window(&mut select, offset, limit);
    Stmt::built(select.build(SqliteQueryBuilder))
}

pub fn deleted_ids(limit: usize) -> Stmt {
    Stmt::built(
        Query::select()
            .column(Objs::Id)
            .from(Objs::Table)
            .and_where(Expr::col(Objs::DeletedAt).is_not_null())
            .order_by(Objs::DeletedAt, Order::Asc)
            .order_by(Objs::Id, Order::Asc)
            .limit(limit as u64)
            .build(SqliteQueryBuilder),
    )
}

/// Keyset page over `(updated_at, id)`.
pub fn indexable_since(
    since: DateTime<Utc>,
    cursor: Option<&ScanCursor>,
    limit: usize,
) -> Stmt {
    let mut select = select_row();
    select
        .and_where(Expr::col((Objs::Table, Objs::ShouldIndex)).eq(true))
        .and_where(Expr::col((Objs::Table, Objs::UpdatedAt)).gte(ms(since)));
    if let Some(c) = cursor {
        select.cond_where(
            Cond::any()
                .add(Expr::col((Objs::Table, Objs::UpdatedAt)).gt(ms(c.updated_at)))
                .add(
                    Cond::all()
                        .add(Expr::col((Objs::Table, Objs::UpdatedAt)).eq(ms(c.updated_at)))
                        .add(Expr::col((Objs::Table, Objs::Id)).gt(c.id.clone())),
                ),
        );
    }
    select
        .order_by((Objs::Table, Objs::UpdatedAt), Order::Asc)
        .order_by((Objs::Table, Objs::Id), Order::Asc)
        .limit(limit as u64);
    Stmt::built(select.build(SqliteQueryBuilder))
}

// ─────────────────────────────────────────────────────────────────────────────
// obj_fields
// ─────────────────────────────────────────────────────────────────────────────

pub fn select_fields(app_id: &str, tag: &str) -> Stmt {
    Stmt::built(
        Query::select()
            .columns(ObjFields::ROW)
            .from(ObjFields::Table)
            .and_where(Expr::col(ObjFields::AppId).eq(app_id))
            .and_where(Expr::col(ObjFields::Tag).eq(tag))
            .order_by(ObjFields::Path, Order::Asc)
            .build(SqliteQueryBuilder),
    )
}

/// Insert or overwrite by `(app_id, tag, path)`; `id` and `created_at` of an
/// existing row are kept.
pub fn upsert_fields(fields: &[ObjField]) -> Result<Option<Stmt>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let mut ins = Query::insert();
    ins.into_table(ObjFields::Table).columns(ObjFields::ROW);
    for f in fields {
        ins.values([
            f.id.clone().into(),
            f.app_id.clone().into(),
            f.tag.clone().into(),
            f.path.clone().into(),
            f.field_type.as_str().into(),
            serde_json::to_string(&f.array_types)?.into(),
            f.is_array_compressed.into(),
            ms(f.created_at).into(),
            ms(f.updated_at).into(),
        ])
        .map_err(build_err)?;
    }
    ins.on_conflict(
        OnConflict::columns([ObjFields::AppId, ObjFields::Tag, ObjFields::Path])
            .update_columns([
                ObjFields::FieldType,
                ObjFields::ArrayTypes,
                ObjFields::IsArrayCompressed,
                ObjFields::UpdatedAt,
            ])
            .to_owned(),
    );
    Ok(Some(Stmt::built(ins.build(SqliteQueryBuilder))))
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn get<'r>(row: &'r SqlRow, column: &str) -> Result<&'r SqlValue> {
    row.get(column)
        .ok_or_else(|| StorageError::Decode(format!("missing column `{column}`")))
}

fn opt_text(row: &SqlRow, column: &str) -> Result<Option<String>> {
    match get(row, column)? {
        SqlValue::Null => Ok(None),
        SqlValue::Text(s) => Ok(Some(s.clone())),
        other => Err(StorageError::Decode(format!(
            "`{column}`: expected text, got {other:?}"
        ))),
    }
}

fn text(row: &SqlRow, column: &str) -> Result<String> {
    opt_text(row, column)?
        .ok_or_else(|| StorageError::Decode(format!("`{column}` is null")))
}

fn opt_ts(row: &SqlRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let ms = match get(row, column)? {
        SqlValue::Null => return Ok(None),
        SqlValue::Long(i) => *i,
        SqlValue::Double(f) => *f as i64,
        other => {
            return Err(StorageError::Decode(format!(
                "`{column}`: expected integer, got {other:?}"
            )))
        }
    };
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(Some)
        .ok_or_else(|| StorageError::Decode(format!("`{column}`: {ms} out of range")))
}

fn ts(row: &SqlRow, column: &str) -> Result<DateTime<Utc>> {
    opt_ts(row, column)?.ok_or_else(|| StorageError::Decode(format!("`{column}` is null")))
}

fn boolean(row: &SqlRow, column: &str) -> Result<bool> {
    match get(row, column)? {
        SqlValue::Bool(b) => Ok(*b),
        SqlValue::Long(i) => Ok(*i != 0),
        other => Err(StorageError::Decode(format!(
            "`{column}`: expected boolean, got {other:?}"
        ))),
    }
}

pub fn decode_obj(row: &SqlRow) -> Result<Obj> {
    let col = |c: Objs| c.name();
    let obj_record = serde_json::from_str(&text(row, &col(Objs::ObjRecord))?)?;
    let fields_to_index = opt_text(row, &col(Objs::FieldsToIndex))?
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(Obj {
        id: text(row, &col(Objs::Id))?,
        created_at: ts(row, &col(Objs::CreatedAt))?,
        created_by: text(row, &col(Objs::CreatedBy))?,
        created_by_type: text(row, &col(Objs::CreatedByType))?,
        updated_at: ts(row, &col(Objs::UpdatedAt))?,
        updated_by: text(row, &col(Objs::UpdatedBy))?,
        updated_by_type: text(row, &col(Objs::UpdatedByType))?,
        app_id: text(row, &col(Objs::AppId))?,
        group_id: text(row, &col(Objs::GroupId))?,
        tag: text(row, &col(Objs::Tag))?,
        obj_record,
        deleted_at: opt_ts(row, &col(Objs::DeletedAt))?,
        deleted_by: opt_text(row, &col(Objs::DeletedBy))?,
        deleted_by_type: opt_text(row, &col(Objs::DeletedByType))?,
        should_index: boolean(row, &col(Objs::ShouldIndex))?,
        fields_to_index,
    })
}

pub fn decode_id(row: &SqlRow) -> Result<String> {
    text(row, &Objs::Id.name())
}

pub fn decode_field(row: &SqlRow) -> Result<ObjField> {
    let col = |c: ObjFields| c.name();
    let field_type = text(row, &col(ObjFields::FieldType))?
        .parse::<FieldType>()
        .map_err(|e| StorageError::Decode(e.to_string()))?;
    let array_types: BTreeSet<FieldType> =
        serde_json::from_str(&text(row, &col(ObjFields::ArrayTypes))?)?;

    Ok(ObjField {
        id: text(row, &col(ObjFields::Id))?,
        app_id: text(row, &col(ObjFields::AppId))?,
        tag: text(row, &col(ObjFields::Tag))?,
        path: text(row, &col(ObjFields::Path))?,
        field_type,
        array_types,
        is_array_compressed: boolean(row, &col(ObjFields::IsArrayCompressed))?,
        created_at: ts(row, &col(ObjFields::CreatedAt))?,
        updated_at: ts(row, &col(ObjFields::UpdatedAt))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn obj(id: &str) -> Obj {
        Obj {
            id: id.into(),
            created_at: at(1_000),
            created_by: "u".into(),
            created_by_type: "user".into(),
            updated_at: at(2_000),
            updated_by: "u".into(),
            updated_by_type: "user".into(),
            app_id: "app".into(),
            group_id: "g".into(),
            tag: "log".into(),
            obj_record: json!({ "tags": ["x"] }).as_object().cloned().unwrap(),
            deleted_at: None,
            deleted_by: None,
            deleted_by_type: None,
            should_index: true,
            fields_to_index: Some(vec!["tags".into()]),
        }
    }

    /// What the infra layer hands back for a stored `obj`.
    fn row_of(o: &Obj) -> SqlRow {
        let values = obj_values(o).unwrap();
        let sql = |e: SimpleExpr| match e {
            SimpleExpr::Value(v) => SqlValue::from(v),
            other => panic!("unexpected expr {other:?}"),
        };
        Objs::ROW
            .into_iter()
            .map(|c| c.name())
            .zip(values.into_iter().map(sql))
            .collect()
    }

    #[test]
    fn insert_writes_row_then_parts() {
        let stmts = insert_objs(&[obj("a"), obj("b")]).unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].sql.starts_with(r#"INSERT INTO "objs""#));
        assert_eq!(stmts[0].values.len(), 2 * Objs::ROW.len());
        assert!(stmts[1].sql.starts_with(r#"INSERT INTO "obj_parts""#));
        assert_eq!(stmts[1].values[0], SqlValue::Text("a".into()));
    }

    #[test]
    fn insert_chunks_large_batches() {
        let objs: Vec<Obj> = (0..OBJS_CHUNK + 1).map(|i| obj(&i.to_string())).collect();
        let stmts = insert_objs(&objs).unwrap();
        let obj_inserts = stmts
            .iter()
            .filter(|s| s.sql.starts_with(r#"INSERT INTO "objs""#))
            .count();
        assert_eq!(obj_inserts, 2);
    }

    #[test]
    fn replace_updates_first_then_rewrites_parts() {
        let stmts = replace_objs(&[obj("a")]).unwrap();
        assert!(stmts[0].sql.starts_with(r#"UPDATE "objs" SET"#));
        assert_eq!(stmts[0].values.last(), Some(&SqlValue::Text("a".into())));
        assert!(stmts[1].sql.starts_with(r#"DELETE FROM "obj_parts""#));
        assert!(stmts[2].sql.starts_with(r#"INSERT INTO "obj_parts""#));
        assert!(replace_objs(&[]).unwrap().is_empty());
    }

    #[test]
    fn mark_deleted_skips_already_deleted_rows() {
        let stamp = DeleteStamp {
            at: at(5),
            by: "admin".into(),
            by_type: "user".into(),
        };
        let stmt = mark_deleted(&["a".into()], &stamp);
        assert!(stmt.sql.contains(r#""deleted_at" IS NULL"#), "{}", stmt.sql);
        assert_eq!(stmt.values[0], SqlValue::Long(5));
    }

    #[test]
    fn offset_without_limit_still_has_limit() {
        let stmt = select_objs(Cond::all(), vec![], (10, None));
        assert!(stmt.sql.contains("LIMIT"), "{}", stmt.sql);
        assert!(stmt.sql.contains("OFFSET"), "{}", stmt.sql);

        let stmt = select_objs(Cond::all(), vec![], (0, None));
        assert!(!stmt.sql.contains("LIMIT"), "{}", stmt.sql);
    }

    #[test]
    fn indexable_scan_orders_by_keyset() {
        let cursor = ScanCursor {
            updated_at: at(7),
            id: "k".into(),
        };
        let stmt = indexable_since(at(1), Some(&cursor), 100);
        assert!(
            stmt.sql.contains(r#"ORDER BY "objs"."updated_at" ASC, "objs"."id" ASC"#),
            "{}",
            stmt.sql
        );
        assert!(stmt.values.contains(&SqlValue::Text("k".into())));
    }

    #[test]
    fn upsert_fields_conflicts_on_path_key() {
        assert!(upsert_fields(&[]).unwrap().is_none());
        let field = ObjField {
            id: "f1".into(),
            app_id: "app".into(),
            tag: "log".into(),
            path: "tags.[*]".into(),
            field_type: FieldType::String,
            array_types: [FieldType::String].into_iter().collect(),
            is_array_compressed: true,
            created_at: at(1),
            updated_at: at(2),
        };
        let stmt = upsert_fields(&[field]).unwrap().unwrap();
        assert!(
            stmt.sql.contains(r#"ON CONFLICT ("app_id", "tag", "path") DO UPDATE"#),
            "{}",
            stmt.sql
        );
        assert!(stmt.values.contains(&SqlValue::Text(r#"["string"]"#.into())));
    }

    #[test]
    fn decode_obj_reverses_encoding() {
        let original = obj("a");
        assert_eq!(decode_obj(&row_of(&original)).unwrap(), original);

        let mut deleted = obj("b");
        deleted.deleted_at = Some(at(9));
        deleted.deleted_by = Some("admin".into());
        deleted.fields_to_index = None;
        assert_eq!(decode_obj(&row_of(&deleted)).unwrap(), deleted);
    }

    #[test]
    fn decode_reports_missing_and_mistyped_columns() {
        let mut row = row_of(&obj("a"));
        row.insert("created_at".into(), SqlValue::Text("soon".into()));
        assert!(matches!(decode_obj(&row), Err(StorageError::Decode(_))));

        row.remove("tag");
        assert!(matches!(decode_obj(&row), Err(StorageError::Decode(_))));
    }
}
