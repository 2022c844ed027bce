use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Path segment marking an array-compressed field (`tags.[*]`).
pub const ARRAY_MARKER: &str = "[*]";

/// Primitive type label observed at a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Null,
}

impl FieldType {
    /// Label used when an array-compressed path has seen more than one type.
    pub const DEFAULT: FieldType = FieldType::String;

    /// Type of a scalar JSON value; `None` for objects and arrays.
    pub fn of(value: &Json) -> Option<Self> {
        match value {
            Json::String(_) => Some(FieldType::String),
            Json::Number(_) => Some(FieldType::Number),
            Json::Bool(_) => Some(FieldType::Boolean),
            Json::Null => Some(FieldType::Null),
            Json::Array(_) | Json::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Null => "null",
        }
    }

    /// Collapse a set of observed types into one label.
    pub fn collapse(types: &BTreeSet<FieldType>) -> FieldType {
        match (types.len(), types.iter().next()) {
            (1, Some(only)) => *only,
            _ => FieldType::DEFAULT,
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown field type: {0}")]
pub struct UnknownFieldType(pub String);

impl FromStr for FieldType {
    type Err = UnknownFieldType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "null" => Ok(FieldType::Null),
            other => Err(UnknownFieldType(other.to_owned())),
        }
    }
}

/// Per-document indexer output, before it is folded into `ObjField` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedField {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub array_types: BTreeSet<FieldType>,
    pub is_array_compressed: bool,
}

impl IndexedField {
    pub fn leaf(path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            path: path.into(),
            field_type,
            array_types: BTreeSet::new(),
            is_array_compressed: false,
        }
    }

    pub fn compressed(path: impl Into<String>, array_types: BTreeSet<FieldType>) -> Self {
        Self {
            path: path.into(),
            field_type: FieldType::collapse(&array_types),
            array_types,
            is_array_compressed: true,
        }
    }
}

/// Cached field metadata, one row per unique `(app_id, tag, path)`.
///
/// Best-effort only: used to pick numeric/date casting for sorts, never to
/// decide whether a record matches a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjField {
    pub id: String,
    pub app_id: String,
    pub tag: String,
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub array_types: BTreeSet<FieldType>,
    pub is_array_compressed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}
