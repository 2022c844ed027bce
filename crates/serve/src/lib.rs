//! Storage-agnostic orchestration: the object store, the background
//! indexing pipeline and the app configuration it consults.

pub mod apps;
pub mod indexer;
pub mod project;
pub mod store;

pub use apps::{AppConfigCache, AppConfigSource, StaticAppConfig};
pub use indexer::{IndexRunReport, IndexingPipeline};
pub use store::ObjStore;
