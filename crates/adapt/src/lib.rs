//! Storage adapters: the query model and its compilers, the document and
//! relational backends, field indexing and the merge rules used by updates.

pub mod catalog;
pub mod index;
pub mod merge;
pub mod mql;
pub mod query;
pub mod sql;
pub mod storage;

pub use catalog::{FieldCatalog, FieldHints};
pub use index::Indexer;
pub use merge::{OnConflict, UpdateWay};
pub use mql::MemObjBackend;
pub use query::{ObjQuery, QueryError};
pub use sql::{SqlExec, SqlObjBackend};
pub use storage::{ObjBackend, ObjFieldBackend, ObjStorage, StorageError};
