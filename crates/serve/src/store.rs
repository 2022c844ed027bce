//! `ObjStorage` over any `ObjBackend`.
//!
//! The store owns everything backend-independent: id and timestamp
//! stamping, pagination, projection, merge strategies, conflict routing and
//! batch loops. Backends only see whole `Obj` rows and `FindSpec` windows.

use adapt::merge::{self, OnConflict, UpdateWay};
use adapt::query::{ObjQuery, Predicate};
use adapt::storage::{
    BulkDeleteArgs, BulkDeleteResult, BulkProgress, BulkUpdateArgs, BulkUpdateResult,
    BulkUpsertArgs, BulkUpsertResult, CleanupArgs, CleanupResult, CreateArgs, CreateResult,
    DeleteArgs, DeleteResult, FindSpec, ObjBackend, ObjStorage, ProgressHook, ReadArgs,
    ReadResult, Result, StorageError, UpdateArgs, UpdateResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::setting::BulkSettings;
use domain::{DeleteStamp, JsonMap, NewObj, Obj};
use futures::future::try_join_all;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::project::project;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct ObjStore<B> {
    backend: B,
    bulk: BulkSettings,
}

/// What a bulk update writes onto every matched record.
struct Mutation<'a> {
    update: &'a JsonMap,
    way: UpdateWay,
    by: &'a str,
    by_type: &'a str,
    should_index: Option<bool>,
    fields_to_index: Option<&'a Vec<String>>,
}

impl Mutation<'_> {
    fn apply(&self, obj: &mut Obj, now: DateTime<Utc>) {
        obj.obj_record = merge::apply(&obj.obj_record, self.update, self.way);
        obj.touch(self.by, self.by_type, now);
        if let Some(flag) = self.should_index {
            obj.should_index = flag;
        }
        if let Some(paths) = self.fields_to_index {
            obj.fields_to_index = Some(paths.clone());
        }
    }
}

/// Where an upsert item with a seen conflict signature currently lives.
#[derive(Debug, Clone, Copy)]
enum Pending {
    New(usize),
    Updated(usize),
}

fn report(hook: Option<&ProgressHook>, processed: usize, total: Option<usize>) {
    if let Some(hook) = hook {
        hook.report(BulkProgress { processed, total });
    }
}

/// Literal value at a dotted path, walking objects only.
fn literal<'a>(item: &'a JsonMap, path: &str) -> Option<&'a Json> {
    let mut segments = path.split('.');
    let mut value = item.get(segments.next()?)?;
    for segment in segments {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

/// Conflict-key values of `item`, or `None` when any key has no scalar value.
fn conflict_values(item: &JsonMap, keys: &[String]) -> Option<Vec<Json>> {
    if keys.is_empty() {
        return None;
    }
    keys.iter()
        .map(|k| match literal(item, k)? {
            Json::Null | Json::Array(_) | Json::Object(_) => None,
            scalar => Some(scalar.clone()),
        })
        .collect()
}

/// In-call identity of a set of conflict values. Numbers compare by value,
/// so `1` and `1.0` share a signature.
fn signature(values: &[Json]) -> String {
    let normalized = values
        .iter()
        .map(|v| match v {
            Json::Number(n) => n.as_f64().map_or_else(|| v.clone(), |f| serde_json::json!(f)),
            other => other.clone(),
        })
        .collect();
    Json::Array(normalized).to_string()
}

impl<B: ObjBackend + Clone> ObjStore<B> {
    pub fn new(backend: B, bulk: BulkSettings) -> Self {
        Self { backend, bulk }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn batch(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .unwrap_or(self.bulk.batch_size)
            .max(1)
    }

    async fn find_conflict(&self, args: &BulkUpsertArgs, values: &[Json]) -> Result<Option<Obj>> {
        let query = args
            .conflict_on_keys
            .iter()
            .zip(values)
            .fold(ObjQuery::for_app(&args.app_id), |q, (key, value)| {
                q.and(Predicate::eq(key.clone(), value.clone()))
            });
        let mut spec = FindSpec::new(query, Utc::now());
        spec.tag = Some(args.tag.clone());
        spec.limit = Some(1);
        Ok(self.backend.find(&spec).await?.into_iter().next())
    }

    /// Look up stored matches for every unseen signature in `chunk`, a
    /// bounded group of concurrent lookups at a time.
    async fn resolve_conflicts(
        &self,
        args: &BulkUpsertArgs,
        chunk: &[(Option<String>, Option<Vec<Json>>)],
        stored: &mut HashMap<String, Obj>,
    ) -> Result<()> {
        let mut queued = HashSet::new();
        let unseen: Vec<(&String, &Vec<Json>)> = chunk
            .iter()
            .filter_map(|(sig, values)| Some((sig.as_ref()?, values.as_ref()?)))
            .filter(|(sig, _)| !stored.contains_key(*sig) && queued.insert(*sig))
            .collect();

        for group in unseen.chunks(self.bulk.lookup_batch_size.max(1)) {
            let found =
                try_join_all(group.iter().map(|(_, values)| self.find_conflict(args, values)))
                    .await?;
            for ((sig, _), obj) in group.iter().zip(found) {
                if let Some(obj) = obj {
                    stored.insert((*sig).clone(), obj);
                }
            }
        }
        Ok(())
    }

    fn draft(&self, args: &BulkUpsertArgs, record: JsonMap, now: DateTime<Utc>) -> Obj {
        let draft = NewObj {
            app_id: args.app_id.clone(),
            group_id: args.group_id.clone(),
            tag: args.tag.clone(),
            obj_record: record,
            created_by: args.created_by.clone(),
            created_by_type: args.created_by_type.clone(),
            should_index: args.should_index.unwrap_or(true),
            fields_to_index: args.fields_to_index.clone(),
        };
        Obj::from_new(new_id(), draft, now)
    }
}

#[async_trait]
impl<B: ObjBackend + Clone> ObjStorage for ObjStore<B> {
    async fn create(&self, args: CreateArgs) -> Result<CreateResult> {
        if let Some(bad) = args
            .objs
            .iter()
            .find(|d| d.app_id.is_empty() || d.tag.is_empty())
        {
            return Err(StorageError::InvalidArgument(format!(
                "appId and tag are required (got appId `{}`, tag `{}`)",
                bad.app_id, bad.tag
            )));
        }

        let now = Utc::now();
        let objs: Vec<Obj> = args
            .objs
            .into_iter()
            .map(|mut draft| {
                if let Some(flag) = args.should_index {
                    draft.should_index = flag;
                }
                Obj::from_new(new_id(), draft, now)
            })
            .collect();
        self.backend.insert(&objs).await?;
        debug!(count = objs.len(), "objs created");
        Ok(CreateResult { objs })
    }

    async fn read(&self, args: ReadArgs) -> Result<ReadResult> {
        let limit = args.limit.unwrap_or(self.bulk.default_read_limit);
        if limit == 0 {
            return Err(StorageError::InvalidArgument("limit must be positive".into()));
        }
        let page = args.page.unwrap_or(0);
        let skip = page
            .checked_mul(limit)
            .ok_or_else(|| StorageError::InvalidArgument(format!("page {page} out of range")))?;

        let mut spec = FindSpec::new(args.query, args.date.unwrap_or_else(Utc::now));
        spec.tag = args.tag;
        spec.sort = args.sort;
        spec.skip = skip;
        spec.limit = Some(
            limit
                .checked_add(1)
                .ok_or_else(|| StorageError::InvalidArgument(format!("limit {limit} out of range")))?,
        );
        spec.include_deleted = args.include_deleted;

        let mut objs = self.backend.find(&spec).await?;
        let has_more = objs.len() > limit;
        objs.truncate(limit);
        for obj in &mut objs {
            project(obj, args.fields.as_deref());
        }

        Ok(ReadResult {
            objs,
            page,
            limit,
            has_more,
        })
    }

    async fn update(&self, args: UpdateArgs) -> Result<UpdateResult> {
        let result = self
            .bulk_update(BulkUpdateArgs {
                query: args.query,
                tag: args.tag,
                update: args.update,
                by: args.by,
                by_type: args.by_type,
                update_way: args.update_way,
                count: args.count,
                should_index: args.should_index,
                fields_to_index: args.fields_to_index,
                batch_size: None,
                fields: args.fields,
                on_progress: None,
            })
            .await?;
        Ok(UpdateResult {
            updated_count: result.updated_count,
            updated_objs: result.updated_objs,
        })
    }

    async fn delete(&self, args: DeleteArgs) -> Result<DeleteResult> {
        let result = self
            .bulk_delete(BulkDeleteArgs {
                query: args.query,
                tag: args.tag,
                deleted_by: args.deleted_by,
                deleted_by_type: args.deleted_by_type,
                delete_many: args.delete_many,
                hard_delete: false,
                batch_size: None,
                on_progress: None,
            })
            .await?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    #[instrument(skip_all, fields(app_id = %args.app_id, tag = %args.tag, items = args.items.len()))]
    async fn bulk_upsert(&self, args: BulkUpsertArgs) -> Result<BulkUpsertResult> {
        if args.app_id.is_empty() || args.tag.is_empty() {
            return Err(StorageError::InvalidArgument("appId and tag are required".into()));
        }

        let total = args.items.len();
        let batch = self.batch(args.batch_size);
        let mut result = BulkUpsertResult::default();
        // Signature → latest known state of the record it identifies.
        let mut stored: HashMap<String, Obj> = HashMap::new();

        for items in args.items.chunks(batch) {
            let keyed: Vec<(Option<String>, Option<Vec<Json>>)> = items
                .iter()
                .map(|item| {
                    let values = conflict_values(item, &args.conflict_on_keys);
                    let sig = values.as_deref().map(signature);
                    (sig, values)
                })
                .collect();

            self.resolve_conflicts(&args, &keyed, &mut stored).await?;

            let now = Utc::now();
            let mut pending: HashMap<String, Pending> = HashMap::new();
            let mut new_objs: Vec<Obj> = Vec::new();
            let mut updated: Vec<Obj> = Vec::new();

            for (item, (sig, _)) in items.iter().zip(keyed) {
                let Some(sig) = sig else {
                    new_objs.push(self.draft(&args, item.clone(), now));
                    continue;
                };

                let found = pending.contains_key(&sig) || stored.contains_key(&sig);
                match (found, args.on_conflict.update_way()) {
                    (false, _) => {
                        new_objs.push(self.draft(&args, item.clone(), now));
                        pending.insert(sig, Pending::New(new_objs.len() - 1));
                    }
                    (true, None) => match args.on_conflict {
                        OnConflict::Fail => result.failed_items.push(item.clone()),
                        _ => result.ignored_items.push(item.clone()),
                    },
                    (true, Some(way)) => {
                        if let Some(obj) = stored.remove(&sig) {
                            updated.push(obj);
                            pending.insert(sig.clone(), Pending::Updated(updated.len() - 1));
                        }
                        let target = match pending.get(&sig) {
                            Some(Pending::New(i)) => &mut new_objs[*i],
                            Some(Pending::Updated(i)) => &mut updated[*i],
                            None => continue,
                        };
                        Mutation {
                            update: item,
                            way,
                            by: &args.created_by,
                            by_type: &args.created_by_type,
                            should_index: args.should_index,
                            fields_to_index: args.fields_to_index.as_ref(),
                        }
                        .apply(target, now);
                    }
                }
            }

            self.backend.insert(&new_objs).await?;
            self.backend.replace(&updated).await?;

            // Later chunks resolve against what this one wrote.
            for (sig, slot) in pending {
                let obj = match slot {
                    Pending::New(i) => &new_objs[i],
                    Pending::Updated(i) => &updated[i],
                };
                stored.insert(sig, obj.clone());
            }

            result.total_processed += items.len();
            result.new_objs.extend(new_objs);
            result.updated_objs.extend(updated);
            report(args.on_progress.as_ref(), result.total_processed, Some(total));
        }

        info!(
            new = result.new_objs.len(),
            updated = result.updated_objs.len(),
            ignored = result.ignored_items.len(),
            failed = result.failed_items.len(),
            "bulk upsert finished"
        );
        Ok(result)
    }

    #[instrument(skip_all, fields(app_id = %args.query.app_id, tag = ?args.tag))]
    async fn bulk_update(&self, args: BulkUpdateArgs) -> Result<BulkUpdateResult> {
        let now = Utc::now();
        let mut spec = FindSpec::new(args.query.clone(), now);
        spec.tag = args.tag.clone();
        spec.limit = args.count;
        let matches = self.backend.find(&spec).await?;

        let total = matches.len();
        let mutation = Mutation {
            update: &args.update,
            way: args.update_way.unwrap_or_default(),
            by: &args.by,
            by_type: &args.by_type,
            should_index: args.should_index,
            fields_to_index: args.fields_to_index.as_ref(),
        };

        let mut result = BulkUpdateResult::default();
        for chunk in matches.chunks(self.batch(args.batch_size)) {
            let mut objs = chunk.to_vec();
            for obj in &mut objs {
                mutation.apply(obj, now);
            }
            result.updated_count += self.backend.replace(&objs).await?;
            result.total_processed += objs.len();
            report(args.on_progress.as_ref(), result.total_processed, Some(total));

            for mut obj in objs {
                project(&mut obj, args.fields.as_deref());
                result.updated_objs.push(obj);
            }
        }

        info!(updated = result.updated_count, "bulk update finished");
        Ok(result)
    }

    #[instrument(skip_all, fields(app_id = %args.query.app_id, tag = ?args.tag, hard = args.hard_delete))]
    async fn bulk_delete(&self, args: BulkDeleteArgs) -> Result<BulkDeleteResult> {
        let now = Utc::now();
        let batch = if args.delete_many {
            self.batch(args.batch_size)
        } else {
            1
        };
        let stamp = DeleteStamp {
            at: now,
            by: args.deleted_by,
            by_type: args.deleted_by_type,
        };

        // Hard deletes may target soft-deleted rows when the query asks for them.
        let include_deleted = args.hard_delete && args.query.top_level_fields.deleted_at.is_some();
        let mut spec = FindSpec::new(args.query, now);
        spec.tag = args.tag;
        spec.limit = Some(batch);
        spec.include_deleted = include_deleted;

        let mut deleted = 0;
        loop {
            let ids: Vec<String> = self
                .backend
                .find(&spec)
                .await?
                .into_iter()
                .map(|o| o.id)
                .collect();
            if ids.is_empty() {
                break;
            }

            let n = if args.hard_delete {
                self.backend.remove(&ids).await?
            } else {
                self.backend.mark_deleted(&ids, &stamp).await?
            };
            deleted += n;
            report(args.on_progress.as_ref(), deleted, None);

            if !args.delete_many || ids.len() < batch || n == 0 {
                break;
            }
        }

        info!(deleted, "bulk delete finished");
        Ok(BulkDeleteResult {
            deleted_count: deleted,
        })
    }

    #[instrument(skip_all)]
    async fn cleanup_deleted_objs(&self, args: CleanupArgs) -> Result<CleanupResult> {
        let batch = self.batch(args.batch_size);
        let mut cleaned = 0;
        loop {
            let ids = self.backend.deleted_ids(batch).await?;
            if ids.is_empty() {
                break;
            }
            let n = self.backend.remove(&ids).await?;
            cleaned += n;
            report(args.on_progress.as_ref(), cleaned, None);
            if ids.len() < batch || n == 0 {
                break;
            }
        }

        info!(cleaned, "cleanup finished");
        Ok(CleanupResult {
            cleaned_count: cleaned,
        })
    }

    async fn with_transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let tx = self.backend.begin().await?;
        let scoped = Self {
            backend: tx.clone(),
            bulk: self.bulk.clone(),
        };

        match f(scoped).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapt::mql::MemObjBackend;
    use adapt::query::{DeletedAtQuery, SortField};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record(v: Json) -> JsonMap {
        v.as_object().cloned().unwrap()
    }

    fn store() -> ObjStore<MemObjBackend> {
        ObjStore::new(MemObjBackend::new(), BulkSettings::default())
    }

    fn draft(record_json: Json) -> NewObj {
        NewObj {
            app_id: "app".into(),
            group_id: "g".into(),
            tag: "log".into(),
            obj_record: record(record_json),
            created_by: "u".into(),
            created_by_type: "user".into(),
            should_index: true,
            fields_to_index: None,
        }
    }

    fn upsert_args(items: Vec<Json>, on_conflict: OnConflict) -> BulkUpsertArgs {
        BulkUpsertArgs {
            items: items.into_iter().map(record).collect(),
            conflict_on_keys: vec!["key".into()],
            on_conflict,
            tag: "log".into(),
            app_id: "app".into(),
            group_id: "g".into(),
            created_by: "u".into(),
            created_by_type: "user".into(),
            should_index: None,
            fields_to_index: None,
            batch_size: None,
            on_progress: None,
        }
    }

    fn read_all() -> ReadArgs {
        ReadArgs {
            query: ObjQuery::for_app("app"),
            tag: Some("log".into()),
            limit: Some(1000),
            ..Default::default()
        }
    }

    // ─────────────────────────────────────────────
    // create / read
    // ─────────────────────────────────────────────

    #[tokio::test]
    async fn create_stamps_ids_and_timestamps() {
        let store = store();
        let created = store
            .create(CreateArgs {
                objs: vec![draft(json!({ "n": 1 })), draft(json!({ "n": 2 }))],
                should_index: Some(false),
            })
            .await
            .unwrap();

        assert_eq!(created.objs.len(), 2);
        assert_ne!(created.objs[0].id, created.objs[1].id);
        assert!(created.objs.iter().all(|o| !o.should_index));
        assert_eq!(created.objs[0].created_at, created.objs[0].updated_at);
        assert_eq!(store.backend().len(), 2);
    }

    #[tokio::test]
    async fn create_requires_app_and_tag() {
        let mut bad = draft(json!({}));
        bad.tag.clear();
        let err = store()
            .create(CreateArgs {
                objs: vec![bad],
                should_index: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn pages_cover_every_record_once() {
        let store = store();
        let drafts = (0..7).map(|i| draft(json!({ "i": i }))).collect();
        store
            .create(CreateArgs {
                objs: drafts,
                should_index: None,
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        for page in 0..3 {
            let result = store
                .read(ReadArgs {
                    page: Some(page),
                    limit: Some(3),
                    sort: vec![SortField::asc("objRecord.i")],
                    ..read_all()
                })
                .await
                .unwrap();
            assert_eq!(result.has_more, page < 2, "page {page}");
            seen.extend(result.objs.iter().map(|o| o.obj_record["i"].as_i64().unwrap()));
        }
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn read_projects_fields_and_rejects_zero_limit() {
        let store = store();
        store
            .create(CreateArgs {
                objs: vec![draft(json!({ "a": 1, "b": { "c": 2, "d": 3 } }))],
                should_index: None,
            })
            .await
            .unwrap();

        let result = store
            .read(ReadArgs {
                fields: Some(vec!["b.c".into()]),
                ..read_all()
            })
            .await
            .unwrap();
        assert_eq!(Json::Object(result.objs[0].obj_record.clone()), json!({ "b": { "c": 2 } }));

        let err = store
            .read(ReadArgs {
                limit: Some(0),
                ..read_all()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn read_rejects_limit_at_usize_max() {
        let store = store();
        let err = store
            .read(ReadArgs {
                limit: Some(usize::MAX),
                ..read_all()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    // ─────────────────────────────────────────────
    // bulk upsert
    // ─────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_routes_conflicts_by_strategy() {
        let store = store();
        let first = store
            .bulk_upsert(upsert_args(vec![json!({ "key": "k", "arr": [1, 2], "x": 1 })], OnConflict::Fail))
            .await
            .unwrap();
        assert_eq!(first.new_objs.len(), 1);

        let item = json!({ "key": "k", "arr": [3, 4], "x": 2 });

        let ignored = store
            .bulk_upsert(upsert_args(vec![item.clone()], OnConflict::Ignore))
            .await
            .unwrap();
        assert_eq!(ignored.ignored_items.len(), 1);
        assert!(ignored.new_objs.is_empty() && ignored.updated_objs.is_empty());

        let failed = store
            .bulk_upsert(upsert_args(vec![item.clone()], OnConflict::Fail))
            .await
            .unwrap();
        assert_eq!(failed.failed_items.len(), 1);
        assert_eq!(failed.total_processed, 1);

        let untouched = store.backend().get(&first.new_objs[0].id).unwrap();
        assert_eq!(untouched.obj_record["x"], json!(1));

        let merged = store
            .bulk_upsert(upsert_args(vec![item], OnConflict::MergeButConcatArrays))
            .await
            .unwrap();
        assert_eq!(merged.updated_objs.len(), 1);
        let stored = store.backend().get(&first.new_objs[0].id).unwrap();
        assert_eq!(
            Json::Object(stored.obj_record),
            json!({ "key": "k", "arr": [1, 2, 3, 4], "x": 2 })
        );
        assert_eq!(store.backend().len(), 1);
    }

    #[tokio::test]
    async fn duplicates_within_one_call_resolve_against_each_other() {
        let store = store();
        let mut args = upsert_args(
            vec![
                json!({ "key": "a", "n": 1 }),
                json!({ "key": "a", "m": 2 }),
                json!({ "key": "b" }),
                json!({ "key": "a", "o": 3 }),
            ],
            OnConflict::Merge,
        );
        args.batch_size = Some(3);
        let result = store.bulk_upsert(args).await.unwrap();

        assert_eq!(result.new_objs.len(), 2);
        assert_eq!(result.updated_objs.len(), 1);
        assert_eq!(result.total_processed, 4);
        assert_eq!(store.backend().len(), 2);

        let a = store.backend().get(&result.new_objs[0].id).unwrap();
        assert_eq!(Json::Object(a.obj_record), json!({ "key": "a", "n": 1, "m": 2, "o": 3 }));
    }

    #[tokio::test]
    async fn integer_and_float_keys_share_a_signature_within_one_call() {
        let store = store();
        let result = store
            .bulk_upsert(upsert_args(
                vec![json!({ "key": 1, "a": true }), json!({ "key": 1.0, "b": true })],
                OnConflict::Merge,
            ))
            .await
            .unwrap();

        assert_eq!(result.new_objs.len(), 1);
        assert!(result.updated_objs.is_empty());
        assert_eq!(store.backend().len(), 1);

        let merged = store.backend().get(&result.new_objs[0].id).unwrap();
        assert_eq!(merged.obj_record["a"], json!(true));
        assert_eq!(merged.obj_record["b"], json!(true));
    }

    #[test]
    fn signature_normalizes_numbers_only() {
        assert_eq!(signature(&[json!(1)]), signature(&[json!(1.0)]));
        assert_ne!(signature(&[json!(1)]), signature(&[json!("1")]));
    }

    #[tokio::test]
    async fn items_without_key_values_are_new() {
        let store = store();
        let result = store
            .bulk_upsert(upsert_args(
                vec![json!({ "other": 1 }), json!({ "other": 1 }), json!({ "key": null })],
                OnConflict::Fail,
            ))
            .await
            .unwrap();
        assert_eq!(result.new_objs.len(), 3);
        assert!(result.failed_items.is_empty());
    }

    #[tokio::test]
    async fn upsert_reports_progress_per_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut args = upsert_args(
            (0..5).map(|i| json!({ "key": i })).collect(),
            OnConflict::Replace,
        );
        args.batch_size = Some(2);
        args.on_progress = Some({
            let calls = calls.clone();
            ProgressHook::new(move |p| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(p.total, Some(5));
            })
        });

        store().bulk_upsert(args).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn conflict_lookup_ignores_soft_deleted_rows() {
        let store = store();
        store
            .bulk_upsert(upsert_args(vec![json!({ "key": "k" })], OnConflict::Fail))
            .await
            .unwrap();
        store
            .bulk_delete(BulkDeleteArgs {
                query: ObjQuery::for_app("app"),
                delete_many: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let again = store
            .bulk_upsert(upsert_args(vec![json!({ "key": "k" })], OnConflict::Fail))
            .await
            .unwrap();
        assert_eq!(again.new_objs.len(), 1);
    }

    // ─────────────────────────────────────────────
    // update
    // ─────────────────────────────────────────────

    #[tokio::test]
    async fn bulk_update_broadcasts_payload_up_to_count() {
        let store = store();
        store
            .create(CreateArgs {
                objs: (0..4).map(|i| draft(json!({ "i": i, "tags": ["a"] }))).collect(),
                should_index: None,
            })
            .await
            .unwrap();

        let result = store
            .bulk_update(BulkUpdateArgs {
                query: ObjQuery::for_app("app"),
                update: record(json!({ "tags": ["b"] })),
                by: "admin".into(),
                by_type: "user".into(),
                update_way: Some(UpdateWay::MergeButConcatArrays),
                count: Some(3),
                batch_size: Some(2),
                fields: Some(vec!["tags".into()]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.updated_count, 3);
        assert_eq!(result.total_processed, 3);
        for obj in &result.updated_objs {
            assert_eq!(Json::Object(obj.obj_record.clone()), json!({ "tags": ["a", "b"] }));
            assert_eq!(obj.updated_by, "admin");
        }
    }

    #[tokio::test]
    async fn update_defaults_to_merge_but_replace_arrays() {
        let store = store();
        store
            .create(CreateArgs {
                objs: vec![draft(json!({ "o": { "a": 1 }, "tags": ["a"] }))],
                should_index: None,
            })
            .await
            .unwrap();

        let result = store
            .update(UpdateArgs {
                query: ObjQuery::for_app("app"),
                update: record(json!({ "o": { "b": 2 }, "tags": ["z"] })),
                by: "u".into(),
                by_type: "user".into(),
                should_index: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.updated_count, 1);
        let obj = &result.updated_objs[0];
        assert_eq!(
            Json::Object(obj.obj_record.clone()),
            json!({ "o": { "a": 1, "b": 2 }, "tags": ["z"] })
        );
        assert!(!obj.should_index);
    }

    // ─────────────────────────────────────────────
    // delete / cleanup
    // ─────────────────────────────────────────────

    async fn seeded(n: usize) -> ObjStore<MemObjBackend> {
        let store = store();
        store
            .create(CreateArgs {
                objs: (0..n).map(|i| draft(json!({ "i": i }))).collect(),
                should_index: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn soft_delete_then_cleanup_round_trip() {
        let store = seeded(3).await;
        let deleted = store
            .bulk_delete(BulkDeleteArgs {
                query: ObjQuery::for_app("app"),
                deleted_by: "admin".into(),
                deleted_by_type: "user".into(),
                delete_many: true,
                batch_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(deleted.deleted_count, 3);
        assert!(store.read(read_all()).await.unwrap().objs.is_empty());

        let with_deleted = store
            .read(ReadArgs {
                include_deleted: true,
                ..read_all()
            })
            .await
            .unwrap();
        assert_eq!(with_deleted.objs.len(), 3);
        assert!(with_deleted.objs.iter().all(|o| o.deleted_at.is_some()));

        let cleaned = store
            .cleanup_deleted_objs(CleanupArgs {
                batch_size: Some(2),
                on_progress: None,
            })
            .await
            .unwrap();
        assert_eq!(cleaned.cleaned_count, 3);
        assert!(store.backend().is_empty());

        let again = store.cleanup_deleted_objs(CleanupArgs::default()).await.unwrap();
        assert_eq!(again.cleaned_count, 0);
    }

    #[tokio::test]
    async fn delete_one_touches_first_match_only() {
        let store = seeded(3).await;
        let result = store
            .delete(DeleteArgs {
                query: ObjQuery::for_app("app"),
                deleted_by: "u".into(),
                deleted_by_type: "user".into(),
                delete_many: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 1);
        assert_eq!(store.read(read_all()).await.unwrap().objs.len(), 2);
    }

    #[tokio::test]
    async fn hard_delete_can_target_soft_deleted_rows() {
        let store = seeded(2).await;
        store
            .delete(DeleteArgs {
                query: ObjQuery::for_app("app"),
                delete_many: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let mut query = ObjQuery::for_app("app");
        query.top_level_fields.deleted_at = Some(DeletedAtQuery {
            exists: Some(true),
            ..Default::default()
        });
        let result = store
            .bulk_delete(BulkDeleteArgs {
                query,
                delete_many: true,
                hard_delete: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 2);
        assert!(store.backend().is_empty());
    }

    // ─────────────────────────────────────────────
    // transactions
    // ─────────────────────────────────────────────

    #[tokio::test]
    async fn transaction_commits_on_success_and_discards_on_error() {
        let store = store();

        store
            .with_transaction(|tx| async move {
                tx.create(CreateArgs {
                    objs: vec![draft(json!({ "n": 1 }))],
                    should_index: None,
                })
                .await?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.backend().len(), 1);

        let err = store
            .with_transaction(|tx| async move {
                tx.create(CreateArgs {
                    objs: vec![draft(json!({ "n": 2 }))],
                    should_index: None,
                })
                .await?;
                Err::<(), _>(StorageError::InvalidArgument("abort".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
        assert_eq!(store.backend().len(), 1);
    }
}
