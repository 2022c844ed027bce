//! Storage ports: the `ObjStorage` contract consumed by the rest of the
//! system, and the backend traits the store is written against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DeleteStamp, JsonMap, NewObj, Obj, ObjField};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::merge::{OnConflict, UpdateWay};
use crate::query::{ObjQuery, QueryError, SortField};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("row decode error: {0}")]
    Decode(String),

    /// Backend failure; the original error is kept as the source.
    #[error(transparent)]
    Backend(Box<dyn StdError + Send + Sync + 'static>),
}

/// Marker for backend error types that may be lifted into `StorageError`.
pub trait DbError: StdError + Send + Sync + 'static {}

impl<E> From<E> for StorageError
where
    E: DbError,
{
    fn from(e: E) -> Self {
        StorageError::Backend(Box::new(e))
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Progress
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkProgress {
    pub processed: usize,
    /// Known up front for upserts and updates; unknown for deletes.
    pub total: Option<usize>,
}

/// Callback invoked after each batch so callers can resume from `processed`.
#[derive(Clone)]
pub struct ProgressHook(Arc<dyn Fn(BulkProgress) + Send + Sync>);

impl ProgressHook {
    pub fn new(f: impl Fn(BulkProgress) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn report(&self, progress: BulkProgress) {
        (self.0)(progress)
    }
}

impl fmt::Debug for ProgressHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressHook")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments / results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
    pub objs: Vec<NewObj>,
    /// Overrides each draft's `shouldIndex` when set.
    #[serde(default)]
    pub should_index: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResult {
    pub objs: Vec<Obj>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadArgs {
    pub query: ObjQuery,
    #[serde(default)]
    pub tag: Option<String>,
    /// 0-based.
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    /// Dotted `objRecord` paths to keep in returned objects.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Reference instant for duration operands; defaults to now.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub objs: Vec<Obj>,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    pub query: ObjQuery,
    pub tag: Option<String>,
    pub update: JsonMap,
    pub by: String,
    pub by_type: String,
    pub update_way: Option<UpdateWay>,
    pub count: Option<usize>,
    pub should_index: Option<bool>,
    pub fields_to_index: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub updated_count: usize,
    pub updated_objs: Vec<Obj>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteArgs {
    pub query: ObjQuery,
    pub tag: Option<String>,
    pub deleted_by: String,
    pub deleted_by_type: String,
    pub delete_many: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: usize,
}

#[derive(Debug, Clone)]
pub struct BulkUpsertArgs {
    pub items: Vec<JsonMap>,
    /// Dotted paths whose literal values identify an existing record.
    pub conflict_on_keys: Vec<String>,
    pub on_conflict: OnConflict,
    pub tag: String,
    pub app_id: String,
    pub group_id: String,
    pub created_by: String,
    pub created_by_type: String,
    pub should_index: Option<bool>,
    pub fields_to_index: Option<Vec<String>>,
    pub batch_size: Option<usize>,
    pub on_progress: Option<ProgressHook>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpsertResult {
    pub new_objs: Vec<Obj>,
    pub updated_objs: Vec<Obj>,
    pub ignored_items: Vec<JsonMap>,
    pub failed_items: Vec<JsonMap>,
    pub total_processed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BulkUpdateArgs {
    pub query: ObjQuery,
    pub tag: Option<String>,
    /// Broadcast to every match.
    pub update: JsonMap,
    pub by: String,
    pub by_type: String,
    pub update_way: Option<UpdateWay>,
    pub count: Option<usize>,
    pub should_index: Option<bool>,
    pub fields_to_index: Option<Vec<String>>,
    pub batch_size: Option<usize>,
    pub fields: Option<Vec<String>>,
    pub on_progress: Option<ProgressHook>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub updated_count: usize,
    pub updated_objs: Vec<Obj>,
    pub total_processed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BulkDeleteArgs {
    pub query: ObjQuery,
    pub tag: Option<String>,
    pub deleted_by: String,
    pub deleted_by_type: String,
    pub delete_many: bool,
    pub hard_delete: bool,
    pub batch_size: Option<usize>,
    pub on_progress: Option<ProgressHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResult {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupArgs {
    pub batch_size: Option<usize>,
    pub on_progress: Option<ProgressHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub cleaned_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public contract
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ObjStorage: Send + Sync {
    async fn create(&self, args: CreateArgs) -> Result<CreateResult>;

    async fn read(&self, args: ReadArgs) -> Result<ReadResult>;

    async fn update(&self, args: UpdateArgs) -> Result<UpdateResult>;

    async fn delete(&self, args: DeleteArgs) -> Result<DeleteResult>;

    async fn bulk_upsert(&self, args: BulkUpsertArgs) -> Result<BulkUpsertResult>;

    async fn bulk_update(&self, args: BulkUpdateArgs) -> Result<BulkUpdateResult>;

    async fn bulk_delete(&self, args: BulkDeleteArgs) -> Result<BulkDeleteResult>;

    async fn cleanup_deleted_objs(&self, args: CleanupArgs) -> Result<CleanupResult>;

    /// Run `f` against a store scoped to one backend transaction. Commits
    /// when `f` succeeds, rolls back otherwise.
    async fn with_transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend ports
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a backend needs to run one filtered, sorted window.
#[derive(Debug, Clone)]
pub struct FindSpec {
    pub query: ObjQuery,
    pub tag: Option<String>,
    pub sort: Vec<SortField>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub reference_date: DateTime<Utc>,
    pub include_deleted: bool,
}

impl FindSpec {
    pub fn new(query: ObjQuery, reference_date: DateTime<Utc>) -> Self {
        Self {
            query,
            tag: None,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            reference_date,
            include_deleted: false,
        }
    }
}

/// Keyset position for the indexing scan, ordered by `(updatedAt, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    pub updated_at: DateTime<Utc>,
    pub id: String,
}

#[async_trait]
pub trait ObjBackend: Send + Sync {
    async fn insert(&self, objs: &[Obj]) -> Result<()>;

    async fn find(&self, spec: &FindSpec) -> Result<Vec<Obj>>;

    /// Overwrite stored rows by id; returns rows written.
    async fn replace(&self, objs: &[Obj]) -> Result<usize>;

    /// Soft delete; rows already deleted are left untouched.
    async fn mark_deleted(&self, ids: &[String], stamp: &DeleteStamp) -> Result<usize>;

    /// Hard delete.
    async fn remove(&self, ids: &[String]) -> Result<usize>;

    /// Ids of soft-deleted rows across all apps, oldest deletion first.
    async fn deleted_ids(&self, limit: usize) -> Result<Vec<String>>;

    /// Rows with `updatedAt >= since` and `shouldIndex`, after `cursor`.
    async fn indexable_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Obj>>;

    /// Handle bound to a new transaction.
    async fn begin(&self) -> Result<Self>
    where
        Self: Sized;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

#[async_trait]
pub trait ObjFieldBackend: Send + Sync {
    async fn get_fields(&self, app_id: &str, tag: &str) -> Result<Vec<ObjField>>;

    /// Insert or overwrite by `(appId, tag, path)`.
    async fn upsert_fields(&self, app_id: &str, tag: &str, fields: &[ObjField]) -> Result<usize>;
}
