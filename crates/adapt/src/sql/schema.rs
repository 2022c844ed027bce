use sea_query::{ColumnDef, Iden, Index, SqliteQueryBuilder, Table};
use std::fmt;

use super::Stmt;
use crate::query::Column;

/// Stored records. Timestamps are epoch milliseconds; `obj_record` and
/// `fields_to_index` are JSON text.
#[derive(Debug, Clone, Copy)]
pub enum Objs {
    Table,
    Id,
    AppId,
    GroupId,
    Tag,
    ObjRecord,
    CreatedAt,
    CreatedBy,
    CreatedByType,
    UpdatedAt,
    UpdatedBy,
    UpdatedByType,
    DeletedAt,
    DeletedBy,
    DeletedByType,
    ShouldIndex,
    FieldsToIndex,
}

impl Iden for Objs {
    fn unquoted(&self, s: &mut dyn fmt::Write) {
        let name = match self {
            Objs::Table => "objs",
            Objs::Id => "id",
            Objs::AppId => "app_id",
            Objs::GroupId => "group_id",
            Objs::Tag => "tag",
            Objs::ObjRecord => "obj_record",
            Objs::CreatedAt => "created_at",
            Objs::CreatedBy => "created_by",
            Objs::CreatedByType => "created_by_type",
            Objs::UpdatedAt => "updated_at",
            Objs::UpdatedBy => "updated_by",
            Objs::UpdatedByType => "updated_by_type",
            Objs::DeletedAt => "deleted_at",
            Objs::DeletedBy => "deleted_by",
            Objs::DeletedByType => "deleted_by_type",
            Objs::ShouldIndex => "should_index",
            Objs::FieldsToIndex => "fields_to_index",
        };
        let _ = s.write_str(name);
    }
}

impl Objs {
    /// Every column of a full row, in select order.
    pub const ROW: [Objs; 16] = [
        Objs::Id,
        Objs::AppId,
        Objs::GroupId,
        Objs::Tag,
        Objs::ObjRecord,
        Objs::CreatedAt,
        Objs::CreatedBy,
        Objs::CreatedByType,
        Objs::UpdatedAt,
        Objs::UpdatedBy,
        Objs::UpdatedByType,
        Objs::DeletedAt,
        Objs::DeletedBy,
        Objs::DeletedByType,
        Objs::ShouldIndex,
        Objs::FieldsToIndex,
    ];

    pub fn name(self) -> String {
        Iden::to_string(&self)
    }
}

impl From<Column> for Objs {
    fn from(c: Column) -> Self {
        match c {
            Column::Id => Objs::Id,
            Column::AppId => Objs::AppId,
            Column::GroupId => Objs::GroupId,
            Column::Tag => Objs::Tag,
            Column::CreatedAt => Objs::CreatedAt,
            Column::CreatedBy => Objs::CreatedBy,
            Column::UpdatedAt => Objs::UpdatedAt,
            Column::UpdatedBy => Objs::UpdatedBy,
            Column::DeletedAt => Objs::DeletedAt,
            Column::DeletedBy => Objs::DeletedBy,
            Column::DeletedByType => Objs::DeletedByType,
            Column::ShouldIndex => Objs::ShouldIndex,
            Column::FieldsToIndex => Objs::FieldsToIndex,
        }
    }
}

/// One row per reachable `objRecord` value, used for filtering and sorting.
#[derive(Debug, Clone, Copy)]
pub enum ObjParts {
    Table,
    ObjId,
    Path,
    /// Set when `path` is the value's own location rather than an
    /// index-stripped alias of it.
    Exact,
    ValueType,
    ValueString,
    ValueNumber,
    ValueBoolean,
}

impl Iden for ObjParts {
    fn unquoted(&self, s: &mut dyn fmt::Write) {
        let name = match self {
            ObjParts::Table => "obj_parts",
            ObjParts::ObjId => "obj_id",
            ObjParts::Path => "path",
            ObjParts::Exact => "exact",
            ObjParts::ValueType => "value_type",
            ObjParts::ValueString => "value_string",
            ObjParts::ValueNumber => "value_number",
            ObjParts::ValueBoolean => "value_boolean",
        };
        let _ = s.write_str(name);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ObjFields {
    Table,
    Id,
    AppId,
    Tag,
    Path,
    FieldType,
    ArrayTypes,
    IsArrayCompressed,
    CreatedAt,
    UpdatedAt,
}

impl Iden for ObjFields {
    fn unquoted(&self, s: &mut dyn fmt::Write) {
        let name = match self {
            ObjFields::Table => "obj_fields",
            ObjFields::Id => "id",
            ObjFields::AppId => "app_id",
            ObjFields::Tag => "tag",
            ObjFields::Path => "path",
            ObjFields::FieldType => "field_type",
            ObjFields::ArrayTypes => "array_types",
            ObjFields::IsArrayCompressed => "is_array_compressed",
            ObjFields::CreatedAt => "created_at",
            ObjFields::UpdatedAt => "updated_at",
        };
        let _ = s.write_str(name);
    }
}

impl ObjFields {
    pub const ROW: [ObjFields; 9] = [
        ObjFields::Id,
        ObjFields::AppId,
        ObjFields::Tag,
        ObjFields::Path,
        ObjFields::FieldType,
        ObjFields::ArrayTypes,
        ObjFields::IsArrayCompressed,
        ObjFields::CreatedAt,
        ObjFields::UpdatedAt,
    ];

    pub fn name(self) -> String {
        Iden::to_string(&self)
    }
}

/// Idempotent DDL for all three tables and their indexes.
pub fn create_statements() -> Vec<Stmt> {
    let objs = Table::create()
        .table(Objs::Table)
        .if_not_exists()
        .col(ColumnDef::new(Objs::Id).text().not_null().primary_key())
        .col(ColumnDef::new(Objs::AppId).text().not_null())
        .col(ColumnDef::new(Objs::GroupId).text().not_null())
        .col(ColumnDef::new(Objs::Tag).text().not_null())
        .col(ColumnDef::new(Objs::ObjRecord).text().not_null())
        .col(ColumnDef::new(Objs::CreatedAt).big_integer().not_null())
        .col(ColumnDef::new(Objs::CreatedBy).text().not_null())
        .col(ColumnDef::new(Objs::CreatedByType).text().not_null())
        .col(ColumnDef::new(Objs::UpdatedAt).big_integer().not_null())
        .col(ColumnDef::new(Objs::UpdatedBy).text().not_null())
        .col(ColumnDef::new(Objs::UpdatedByType).text().not_null())
        .col(ColumnDef::new(Objs::DeletedAt).big_integer().null())
        .col(ColumnDef::new(Objs::DeletedBy).text().null())
        .col(ColumnDef::new(Objs::DeletedByType).text().null())
        .col(ColumnDef::new(Objs::ShouldIndex).boolean().not_null())
        .col(ColumnDef::new(Objs::FieldsToIndex).text().null())
        .to_owned();

    let parts = Table::create()
        .table(ObjParts::Table)
        .if_not_exists()
        .col(ColumnDef::new(ObjParts::ObjId).text().not_null())
        .col(ColumnDef::new(ObjParts::Path).text().not_null())
        .col(ColumnDef::new(ObjParts::Exact).boolean().not_null())
        .col(ColumnDef::new(ObjParts::ValueType).text().not_null())
        .col(ColumnDef::new(ObjParts::ValueString).text().null())
        .col(ColumnDef::new(ObjParts::ValueNumber).double().null())
        .col(ColumnDef::new(ObjParts::ValueBoolean).boolean().null())
        .to_owned();

    let fields = Table::create()
        .table(ObjFields::Table)
        .if_not_exists()
        .col(ColumnDef::new(ObjFields::Id).text().not_null().primary_key())
        .col(ColumnDef::new(ObjFields::AppId).text().not_null())
        .col(ColumnDef::new(ObjFields::Tag).text().not_null())
        .col(ColumnDef::new(ObjFields::Path).text().not_null())
        .col(ColumnDef::new(ObjFields::FieldType).text().not_null())
        .col(ColumnDef::new(ObjFields::ArrayTypes).text().not_null())
        .col(ColumnDef::new(ObjFields::IsArrayCompressed).boolean().not_null())
        .col(ColumnDef::new(ObjFields::CreatedAt).big_integer().not_null())
        .col(ColumnDef::new(ObjFields::UpdatedAt).big_integer().not_null())
        .to_owned();

    let indexes = [
        Index::create()
            .if_not_exists()
            .name("idx_objs_scope")
            .table(Objs::Table)
            .col(Objs::AppId)
            .col(Objs::Tag)
            .col(Objs::DeletedAt)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_objs_updated")
            .table(Objs::Table)
            .col(Objs::UpdatedAt)
            .col(Objs::Id)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_objs_deleted")
            .table(Objs::Table)
            .col(Objs::DeletedAt)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_obj_parts_lookup")
            .table(ObjParts::Table)
            .col(ObjParts::Path)
            .col(ObjParts::ValueType)
            .col(ObjParts::ObjId)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("idx_obj_parts_obj")
            .table(ObjParts::Table)
            .col(ObjParts::ObjId)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .unique()
            .name("idx_obj_fields_path")
            .table(ObjFields::Table)
            .col(ObjFields::AppId)
            .col(ObjFields::Tag)
            .col(ObjFields::Path)
            .to_owned(),
    ];

    [objs, parts, fields]
        .iter()
        .map(|t| t.to_string(SqliteQueryBuilder))
        .chain(indexes.iter().map(|i| i.to_string(SqliteQueryBuilder)))
        .map(|sql| Stmt::new(sql, Vec::new()))
        .collect()
}
