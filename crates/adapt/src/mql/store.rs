use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DeleteStamp, Obj, ObjField};
use parking_lot::RwLock;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::ast::FindOptions;
use super::compile::DocCompiler;
use super::parser::parse_filter;
use super::query::execute;
use crate::query::{CompileOptions, QueryCompiler};
use crate::storage::{FindSpec, ObjBackend, ObjFieldBackend, Result, ScanCursor, StorageError};

#[derive(Debug, Clone, Default)]
struct State {
    objs: BTreeMap<String, Obj>,
    fields: HashMap<(String, String), BTreeMap<String, ObjField>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory document backend
// ─────────────────────────────────────────────────────────────────────────────

/// Document-store backend kept in process memory.
///
/// Queries go through the same compile → parse → evaluate path a real
/// document database would see, so it doubles as the reference backend in
/// tests. A transaction works on a private snapshot and publishes it on
/// commit; concurrent writers to the parent are overwritten.
#[derive(Debug, Clone, Default)]
pub struct MemObjBackend {
    state: Arc<RwLock<State>>,
    parent: Option<Arc<RwLock<State>>>,
}

impl MemObjBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Obj> {
        self.state.read().objs.get(id).cloned()
    }
}

#[async_trait]
impl ObjBackend for MemObjBackend {
    async fn insert(&self, objs: &[Obj]) -> Result<()> {
        let mut state = self.state.write();
        if let Some(dup) = objs.iter().find(|o| state.objs.contains_key(&o.id)) {
            return Err(StorageError::InvalidArgument(format!("duplicate id {}", dup.id)));
        }
        for obj in objs {
            state.objs.insert(obj.id.clone(), obj.clone());
        }
        Ok(())
    }

    async fn find(&self, spec: &FindSpec) -> Result<Vec<Obj>> {
        let compiler = DocCompiler;
        let opts = CompileOptions {
            tag: spec.tag.as_deref(),
            reference_date: spec.reference_date,
            include_deleted: spec.include_deleted,
        };
        let filter = parse_filter(&compiler.transform_filter(&spec.query, &opts)?)?;
        let (skip, limit) = compiler.transform_pagination(spec.skip, spec.limit);
        let find = FindOptions {
            sort: compiler.transform_sort(&spec.sort, None)?,
            skip,
            limit,
        };

        let state = self.state.read();
        let objs: Vec<&Obj> = state.objs.values().collect();
        let docs = objs
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<Json>, _>>()?;

        Ok(execute(docs.iter().enumerate(), &filter, &find)
            .into_iter()
            .map(|hit| objs[hit.id].clone())
            .collect())
    }

    async fn replace(&self, objs: &[Obj]) -> Result<usize> {
        let mut state = self.state.write();
        let mut written = 0;
        for obj in objs {
            if let Some(slot) = state.objs.get_mut(&obj.id) {
                *slot = obj.clone();
                written += 1;
            }
        }
        Ok(written)
    }

    async fn mark_deleted(&self, ids: &[String], stamp: &DeleteStamp) -> Result<usize> {
        let mut state = self.state.write();
        let mut marked = 0;
        for id in ids {
            if let Some(obj) = state.objs.get_mut(id).filter(|o| !o.is_deleted()) {
                obj.apply_delete(stamp);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut state = self.state.write();
        Ok(ids.iter().filter(|id| state.objs.remove(*id).is_some()).count())
    }

    async fn deleted_ids(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut deleted: Vec<(DateTime<Utc>, &String)> = state
            .objs
            .values()
            .filter_map(|o| o.deleted_at.map(|at| (at, &o.id)))
            .collect();
        deleted.sort();
        Ok(deleted.into_iter().take(limit).map(|(_, id)| id.clone()).collect())
    }

    async fn indexable_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Obj>> {
        let after = |o: &Obj| match cursor {
            None => true,
            Some(c) => (o.updated_at, o.id.as_str()) > (c.updated_at, c.id.as_str()),
        };

        let state = self.state.read();
        let mut hits: Vec<&Obj> = state
            .objs
            .values()
            .filter(|o| o.should_index && o.updated_at >= since && after(o))
            .collect();
        hits.sort_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)));
        Ok(hits.into_iter().take(limit).cloned().collect())
    }

    async fn begin(&self) -> Result<Self> {
        let snapshot = self.state.read().clone();
        Ok(Self {
            state: Arc::new(RwLock::new(snapshot)),
            parent: Some(self.state.clone()),
        })
    }

    async fn commit(&self) -> Result<()> {
        if let Some(parent) = &self.parent {
            *parent.write() = self.state.read().clone();
            debug!("in-memory transaction committed");
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if self.parent.is_some() {
            debug!("in-memory transaction discarded");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjFieldBackend for MemObjBackend {
    async fn get_fields(&self, app_id: &str, tag: &str) -> Result<Vec<ObjField>> {
        Ok(self
            .state
            .read()
            .fields
            .get(&(app_id.to_owned(), tag.to_owned()))
            .map(|by_path| by_path.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_fields(&self, app_id: &str, tag: &str, fields: &[ObjField]) -> Result<usize> {
        let mut state = self.state.write();
        let by_path = state
            .fields
            .entry((app_id.to_owned(), tag.to_owned()))
            .or_default();
        for field in fields {
            by_path.insert(field.path.clone(), field.clone());
        }
        Ok(fields.len())
    }
}
