use chrono::{DateTime, Utc};

use super::ast::{ObjQuery, SortField};
use super::error::QueryError;
use super::resolve::{Column, ResolveOptions, ResolvedQuery, RECORD_PREFIX};
use crate::catalog::FieldHints;

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions<'a> {
    pub tag: Option<&'a str>,
    pub reference_date: DateTime<Utc>,
    pub include_deleted: bool,
}

impl<'a> CompileOptions<'a> {
    pub fn resolve(&self) -> ResolveOptions<'a> {
        ResolveOptions {
            tag: self.tag,
            now: self.reference_date,
            include_deleted: self.include_deleted,
        }
    }
}

/// One compiler per physical store; the AST never sees native types.
pub trait QueryCompiler {
    type Filter;
    type Sort;
    type Page;

    fn transform_filter(
        &self,
        query: &ObjQuery,
        opts: &CompileOptions<'_>,
    ) -> Result<Self::Filter, QueryError>;

    /// `hints` is best-effort field metadata; absence must not fail.
    fn transform_sort(
        &self,
        sort: &[SortField],
        hints: Option<&FieldHints>,
    ) -> Result<Self::Sort, QueryError>;

    fn transform_pagination(&self, skip: usize, limit: Option<usize>) -> Self::Page;
}

/// Validate and resolve in one step; shared by every compiler.
pub fn resolve_query(
    query: &ObjQuery,
    opts: &CompileOptions<'_>,
) -> Result<ResolvedQuery, QueryError> {
    query.validate()?;
    Ok(ResolvedQuery::new(query, opts.resolve()))
}

/// Where a sort key points.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey<'a> {
    Column(Column),
    Record(&'a str),
}

pub fn sort_key(field: &str) -> Result<SortKey<'_>, QueryError> {
    if let Some(path) = field.strip_prefix(RECORD_PREFIX) {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(QueryError::InvalidSort(format!("bad record path `{field}`")));
        }
        return Ok(SortKey::Record(path));
    }
    Column::sortable(field)
        .map(SortKey::Column)
        .ok_or_else(|| QueryError::InvalidSort(format!("unknown sort field `{field}`")))
}

/// Append the `id` tiebreaker; default to `createdAt asc` when empty.
pub fn with_tiebreaker(sort: &[SortField]) -> Vec<SortField> {
    let mut out: Vec<SortField> = if sort.is_empty() {
        vec![SortField::asc("createdAt")]
    } else {
        sort.to_vec()
    };
    if !out.iter().any(|s| s.field == "id") {
        out.push(SortField::asc("id"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keys_split_columns_and_record_paths() {
        assert_eq!(sort_key("updatedAt").unwrap(), SortKey::Column(Column::UpdatedAt));
        assert_eq!(sort_key("objRecord.a.b").unwrap(), SortKey::Record("a.b"));
        assert!(sort_key("objRecord.").is_err());
        assert!(sort_key("nope").is_err());
    }

    #[test]
    fn tiebreaker_is_appended_once() {
        let s = with_tiebreaker(&[]);
        assert_eq!(s, vec![SortField::asc("createdAt"), SortField::asc("id")]);

        let s = with_tiebreaker(&[SortField::desc("id")]);
        assert_eq!(s, vec![SortField::desc("id")]);
    }
}
