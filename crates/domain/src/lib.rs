pub mod field;
pub mod obj;
pub mod setting;

pub use field::{FieldType, IndexedField, ObjField};
pub use obj::{DeleteStamp, NewObj, Obj};

/// Schemaless record body stored under `Obj::obj_record`.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
