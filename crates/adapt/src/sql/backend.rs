use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DeleteStamp, Obj, ObjField};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::compile::SqlCompiler;
use super::schema::create_statements;
use super::stmt;
use super::SqlExec;
use crate::catalog::{FieldCatalog, FieldHints};
use crate::query::compile::{sort_key, SortKey};
use crate::query::{CompileOptions, QueryCompiler};
use crate::storage::{FindSpec, ObjBackend, ObjFieldBackend, Result, ScanCursor};

/// Relational `ObjBackend` over any `SqlExec`.
///
/// Field hints for record-path sorts are read through a shared
/// `FieldCatalog`; writing field metadata drops the cached entry.
#[derive(Debug, Clone)]
pub struct SqlObjBackend<E> {
    exec: E,
    catalog: FieldCatalog,
}

impl<E: SqlExec> SqlObjBackend<E> {
    pub fn new(exec: E) -> Self {
        Self {
            exec,
            catalog: FieldCatalog::new(),
        }
    }

    pub fn with_catalog(exec: E, catalog: FieldCatalog) -> Self {
        Self { exec, catalog }
    }

    pub fn exec(&self) -> &E {
        &self.exec
    }

    /// Create tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.exec.execute(create_statements()).await?;
        Ok(())
    }

    async fn hints(&self, spec: &FindSpec) -> Result<Option<Arc<FieldHints>>> {
        let Some(tag) = spec.tag.as_deref() else {
            return Ok(None);
        };
        let sorts_record = spec
            .sort
            .iter()
            .any(|s| matches!(sort_key(&s.field), Ok(SortKey::Record(_))));
        if !sorts_record {
            return Ok(None);
        }

        let app_id = spec.query.app_id.as_str();
        if let Some(hints) = self.catalog.get(app_id, tag) {
            return Ok(Some(hints));
        }
        let fields = self.get_fields(app_id, tag).await?;
        debug!(app_id, tag, fields = fields.len(), "loaded sort hints");
        Ok(Some(self.catalog.insert(app_id, tag, FieldHints::new(fields))))
    }
}

#[async_trait]
impl<E: SqlExec> ObjBackend for SqlObjBackend<E> {
    async fn insert(&self, objs: &[Obj]) -> Result<()> {
        if objs.is_empty() {
            return Ok(());
        }
        self.exec.execute(stmt::insert_objs(objs)?).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(app_id = %spec.query.app_id, tag = ?spec.tag))]
    async fn find(&self, spec: &FindSpec) -> Result<Vec<Obj>> {
        let compiler = SqlCompiler;
        let opts = CompileOptions {
            tag: spec.tag.as_deref(),
            reference_date: spec.reference_date,
            include_deleted: spec.include_deleted,
        };
        let hints = self.hints(spec).await?;
        let filter = compiler.transform_filter(&spec.query, &opts)?;
        let sort = compiler.transform_sort(&spec.sort, hints.as_deref())?;
        let page = compiler.transform_pagination(spec.skip, spec.limit);

        let rows = self.exec.fetch(stmt::select_objs(filter, sort, page)).await?;
        rows.iter().map(stmt::decode_obj).collect()
    }

    async fn replace(&self, objs: &[Obj]) -> Result<usize> {
        if objs.is_empty() {
            return Ok(0);
        }
        let counts = self.exec.execute(stmt::replace_objs(objs)?).await?;
        Ok(counts.iter().take(objs.len()).sum::<u64>() as usize)
    }

    async fn mark_deleted(&self, ids: &[String], stamp: &DeleteStamp) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let counts = self.exec.execute(vec![stmt::mark_deleted(ids, stamp)]).await?;
        Ok(counts.first().copied().unwrap_or(0) as usize)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let counts = self.exec.execute(stmt::remove_objs(ids)).await?;
        Ok(counts.last().copied().unwrap_or(0) as usize)
    }

    async fn deleted_ids(&self, limit: usize) -> Result<Vec<String>> {
        let rows = self.exec.fetch(stmt::deleted_ids(limit)).await?;
        rows.iter().map(stmt::decode_id).collect()
    }

    async fn indexable_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Obj>> {
        let rows = self
            .exec
            .fetch(stmt::indexable_since(since, cursor, limit))
            .await?;
        rows.iter().map(stmt::decode_obj).collect()
    }

    async fn begin(&self) -> Result<Self> {
        Ok(Self {
            exec: self.exec.begin().await?,
            catalog: self.catalog.clone(),
        })
    }

    async fn commit(&self) -> Result<()> {
        self.exec.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.exec.rollback().await
    }
}

#[async_trait]
impl<E: SqlExec> ObjFieldBackend for SqlObjBackend<E> {
    async fn get_fields(&self, app_id: &str, tag: &str) -> Result<Vec<ObjField>> {
        let rows = self.exec.fetch(stmt::select_fields(app_id, tag)).await?;
        rows.iter().map(stmt::decode_field).collect()
    }

    async fn upsert_fields(&self, app_id: &str, tag: &str, fields: &[ObjField]) -> Result<usize> {
        let Some(upsert) = stmt::upsert_fields(fields)? else {
            return Ok(0);
        };
        self.exec.execute(vec![upsert]).await?;
        self.catalog.invalidate(app_id, tag);
        Ok(fields.len())
    }
}
