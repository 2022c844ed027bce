use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JsonMap;

/// A stored record: a schemaless `obj_record` plus its metadata envelope.
///
/// Timestamps serialize as epoch milliseconds so the document form and the
/// relational form of an `Obj` compare the same numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obj {
    pub id: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub created_by_type: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_by_type: String,

    pub app_id: String,
    pub group_id: String,
    /// Logical collection name, e.g. "log", "member", "permission".
    pub tag: String,
    pub obj_record: JsonMap,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<String>,
    #[serde(default)]
    pub deleted_by_type: Option<String>,

    #[serde(default)]
    pub should_index: bool,
    #[serde(default)]
    pub fields_to_index: Option<Vec<String>>,
}

impl Obj {
    /// Stamp a draft into a stored record.
    pub fn from_new(id: impl Into<String>, draft: NewObj, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            created_by: draft.created_by.clone(),
            created_by_type: draft.created_by_type.clone(),
            updated_at: now,
            updated_by: draft.created_by,
            updated_by_type: draft.created_by_type,
            app_id: draft.app_id,
            group_id: draft.group_id,
            tag: draft.tag,
            obj_record: draft.obj_record,
            deleted_at: None,
            deleted_by: None,
            deleted_by_type: None,
            should_index: draft.should_index,
            fields_to_index: draft.fields_to_index,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Refresh the `updated*` envelope after a mutation.
    pub fn touch(&mut self, by: &str, by_type: &str, now: DateTime<Utc>) {
        self.updated_at = now;
        self.updated_by = by.to_owned();
        self.updated_by_type = by_type.to_owned();
    }

    pub fn apply_delete(&mut self, stamp: &DeleteStamp) {
        self.deleted_at = Some(stamp.at);
        self.deleted_by = Some(stamp.by.clone());
        self.deleted_by_type = Some(stamp.by_type.clone());
    }
}

/// Caller-supplied draft; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewObj {
    pub app_id: String,
    pub group_id: String,
    pub tag: String,
    pub obj_record: JsonMap,
    pub created_by: String,
    pub created_by_type: String,
    #[serde(default = "default_should_index")]
    pub should_index: bool,
    #[serde(default)]
    pub fields_to_index: Option<Vec<String>>,
}

fn default_should_index() -> bool {
    true
}

/// Who soft-deleted a record, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStamp {
    pub at: DateTime<Utc>,
    pub by: String,
    pub by_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, to_value};

    fn draft() -> NewObj {
        NewObj {
            app_id: "app-1".into(),
            group_id: "grp-1".into(),
            tag: "log".into(),
            obj_record: json!({ "level": "info" }).as_object().cloned().unwrap(),
            created_by: "user-1".into(),
            created_by_type: "user".into(),
            should_index: true,
            fields_to_index: None,
        }
    }

    #[test]
    fn from_new_fills_envelope() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let obj = Obj::from_new("obj-1", draft(), now);

        assert_eq!(obj.id, "obj-1");
        assert_eq!(obj.created_at, now);
        assert_eq!(obj.updated_at, now);
        assert_eq!(obj.updated_by, "user-1");
        assert!(!obj.is_deleted());
    }

    #[test]
    fn serializes_camel_case_with_millisecond_timestamps() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let obj = Obj::from_new("obj-1", draft(), now);
        let v = to_value(&obj).unwrap();

        assert_eq!(v["createdAt"], json!(1_700_000_000_123_i64));
        assert_eq!(v["appId"], json!("app-1"));
        assert_eq!(v["objRecord"]["level"], json!("info"));
        assert_eq!(v["deletedAt"], json!(null));

        let back: Obj = serde_json::from_value(v).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn apply_delete_and_touch() {
        let now = Utc.timestamp_millis_opt(1_000).unwrap();
        let later = Utc.timestamp_millis_opt(2_000).unwrap();
        let mut obj = Obj::from_new("obj-1", draft(), now);

        obj.touch("svc", "service", later);
        assert_eq!(obj.updated_at, later);
        assert_eq!(obj.updated_by_type, "service");

        obj.apply_delete(&DeleteStamp {
            at: later,
            by: "admin".into(),
            by_type: "user".into(),
        });
        assert!(obj.is_deleted());
        assert_eq!(obj.deleted_by.as_deref(), Some("admin"));
    }

    #[test]
    fn new_obj_defaults_should_index_to_true() {
        let v = json!({
            "appId": "a", "groupId": "g", "tag": "t",
            "objRecord": {}, "createdBy": "u", "createdByType": "user"
        });
        let draft: NewObj = serde_json::from_value(v).unwrap();
        assert!(draft.should_index);
        assert!(draft.fields_to_index.is_none());
    }
}
