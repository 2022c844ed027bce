// crates/serve/src/indexer.rs

//! Background field-metadata pipeline.
//!
//! Scans objects written since the last watermark in `(updatedAt, id)`
//! keyset order, re-runs the `Indexer` over each record and folds the result
//! into `ObjField` rows. Groups are processed one after another so two
//! batches never race to create the same field row.

use adapt::catalog::{differs, fold_indexed_field};
use adapt::index::{FieldMap, Indexer};
use adapt::storage::{ObjBackend, ObjFieldBackend, Result, ScanCursor};
use chrono::{DateTime, Utc};
use domain::field::ARRAY_MARKER;
use domain::{Obj, ObjField};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

use crate::apps::{AppConfigCache, AppConfigSource};
use crate::store::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRunReport {
    pub scanned: usize,
    pub indexed: usize,
    pub fields_inserted: usize,
    pub fields_updated: usize,
    /// Start of this run; pass it back as the next `last_success_at`.
    pub watermark: DateTime<Utc>,
}

pub struct IndexingPipeline<B, S> {
    backend: B,
    apps: AppConfigCache<S>,
    batch_size: usize,
    indexer: Indexer,
}

/// Path with compression markers removed, so `tags.[*].k` reads `tags.k`.
fn plain(path: &str) -> String {
    path.split('.')
        .filter(|s| *s != ARRAY_MARKER)
        .collect::<Vec<_>>()
        .join(".")
}

/// Keep `path` when it equals an allow-list entry or sits under one.
pub fn allowed(path: &str, allow_list: &[String]) -> bool {
    let path = plain(path);
    allow_list.iter().any(|entry| {
        let entry = plain(entry);
        path == entry
            || path
                .strip_prefix(entry.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

#[derive(Debug, Default)]
struct GroupOutcome {
    inserted: usize,
    updated: usize,
}

impl<B, S> IndexingPipeline<B, S>
where
    B: ObjBackend + ObjFieldBackend,
    S: AppConfigSource,
{
    pub fn new(backend: B, apps: AppConfigCache<S>, batch_size: usize) -> Self {
        Self {
            backend,
            apps,
            batch_size: batch_size.max(1),
            indexer: Indexer,
        }
    }

    /// One full pass. Re-running with the same `last_success_at` leaves the
    /// stored metadata unchanged.
    #[instrument(skip_all, fields(since = ?last_success_at))]
    pub async fn index_objs(
        &self,
        last_success_at: Option<DateTime<Utc>>,
    ) -> Result<IndexRunReport> {
        let watermark = Utc::now();
        let since = last_success_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.apps.clear();

        let mut report = IndexRunReport {
            scanned: 0,
            indexed: 0,
            fields_inserted: 0,
            fields_updated: 0,
            watermark,
        };
        let mut cursor: Option<ScanCursor> = None;

        loop {
            let batch = self
                .backend
                .indexable_since(since, cursor.as_ref(), self.batch_size)
                .await?;
            report.scanned += batch.len();

            let mut groups: BTreeMap<(&str, &str), Vec<&Obj>> = BTreeMap::new();
            for obj in &batch {
                groups
                    .entry((obj.app_id.as_str(), obj.tag.as_str()))
                    .or_default()
                    .push(obj);
            }
            for ((app_id, tag), objs) in groups {
                let outcome = self.index_group(app_id, tag, &objs).await?;
                report.indexed += objs.len();
                report.fields_inserted += outcome.inserted;
                report.fields_updated += outcome.updated;
            }

            cursor = batch.last().map(|o| ScanCursor {
                updated_at: o.updated_at,
                id: o.id.clone(),
            });
            if batch.len() < self.batch_size {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            inserted = report.fields_inserted,
            updated = report.fields_updated,
            "indexing pass finished"
        );
        Ok(report)
    }

    async fn fields_of(&self, obj: &Obj) -> Result<FieldMap> {
        let mut fields = self.indexer.index(&obj.obj_record);
        let allow_list = match &obj.fields_to_index {
            Some(list) => Some(list.clone()),
            None => self.apps.get(&obj.app_id).await?.fields_to_index.clone(),
        };
        if let Some(list) = allow_list {
            fields.retain(|path, _| allowed(path, &list));
        }
        Ok(fields)
    }

    async fn index_group(&self, app_id: &str, tag: &str, objs: &[&Obj]) -> Result<GroupOutcome> {
        let stored: HashMap<String, ObjField> = self
            .backend
            .get_fields(app_id, tag)
            .await?
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect();

        let now = Utc::now();
        let mut working: BTreeMap<String, ObjField> = BTreeMap::new();
        for obj in objs {
            for (path, incoming) in self.fields_of(obj).await? {
                let prev = working.get(&path).or_else(|| stored.get(&path));
                let next = fold_indexed_field(prev, &incoming, app_id, tag, new_id, now);
                working.insert(path, next);
            }
        }

        let mut outcome = GroupOutcome::default();
        let changed: Vec<ObjField> = working
            .into_values()
            .filter(|field| match stored.get(&field.path) {
                None => {
                    outcome.inserted += 1;
                    true
                }
                Some(prev) if differs(prev, field) => {
                    outcome.updated += 1;
                    true
                }
                Some(_) => false,
            })
            .collect();

        if !changed.is_empty() {
            self.backend.upsert_fields(app_id, tag, &changed).await?;
        }
        debug!(app_id, tag, objs = objs.len(), changed = changed.len(), "group indexed");
        Ok(outcome)
    }
}
