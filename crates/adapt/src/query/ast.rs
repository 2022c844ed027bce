use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::error::QueryError;

/// Upper bound on `in` / `not_in` list length for record predicates.
pub const MAX_IN_VALUES: usize = 100;

/// Calendar-naive duration. Every unit is optional and additive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weeks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milliseconds: Option<u64>,
}

/// Operand of a range comparison: raw number, ISO-8601 string or duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeValue {
    Number(f64),
    Text(String),
    Duration(DurationSpec),
}

/// One condition against a dotted path inside `objRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq {
        field: String,
        value: Json,
    },
    Neq {
        field: String,
        value: Json,
    },
    Gt {
        field: String,
        value: RangeValue,
    },
    Gte {
        field: String,
        value: RangeValue,
    },
    Lt {
        field: String,
        value: RangeValue,
    },
    Lte {
        field: String,
        value: RangeValue,
    },
    Between {
        field: String,
        value: (RangeValue, RangeValue),
    },
    In {
        field: String,
        value: Vec<Json>,
    },
    NotIn {
        field: String,
        value: Vec<Json>,
    },
    Like {
        field: String,
        value: String,
        #[serde(default, rename = "caseSensitive")]
        case_sensitive: bool,
    },
    Exists {
        field: String,
        value: bool,
    },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Eq { field, .. }
            | Predicate::Neq { field, .. }
            | Predicate::Gt { field, .. }
            | Predicate::Gte { field, .. }
            | Predicate::Lt { field, .. }
            | Predicate::Lte { field, .. }
            | Predicate::Between { field, .. }
            | Predicate::In { field, .. }
            | Predicate::NotIn { field, .. }
            | Predicate::Like { field, .. }
            | Predicate::Exists { field, .. } => field,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Json>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Shape checks that do not depend on the reference date.
    pub fn validate(&self) -> Result<(), QueryError> {
        let field = self.field();
        if field.is_empty() || field.split('.').any(str::is_empty) {
            return Err(QueryError::predicate(field, "empty path segment"));
        }

        match self {
            Predicate::Eq { value, .. } | Predicate::Neq { value, .. } => scalar(field, value),
            Predicate::In { value, .. } | Predicate::NotIn { value, .. } => {
                if value.is_empty() || value.len() > MAX_IN_VALUES {
                    return Err(QueryError::predicate(
                        field,
                        format!("expected 1..={MAX_IN_VALUES} values, got {}", value.len()),
                    ));
                }
                value.iter().try_for_each(|v| scalar(field, v))
            }
            Predicate::Like {
                value,
                case_sensitive,
                ..
            } => like_regex(value, *case_sensitive).map(|_| ()),
            _ => Ok(()),
        }
    }
}

fn scalar(field: &str, value: &Json) -> Result<(), QueryError> {
    match value {
        Json::Array(_) | Json::Object(_) => {
            Err(QueryError::predicate(field, "value must be a scalar"))
        }
        _ => Ok(()),
    }
}

/// Pattern text actually handed to a regex engine for a `like` predicate.
pub fn like_pattern(pattern: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        pattern.to_owned()
    } else {
        format!("(?i){pattern}")
    }
}

pub fn like_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, QueryError> {
    Regex::new(&like_pattern(pattern, case_sensitive)).map_err(|source| {
        QueryError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Predicate>,
}

/// `{eq, neq, in, not_in}` against a string column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringMetaQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<String>,
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_in: Option<Vec<String>>,
}

impl StringMetaQuery {
    pub fn eq(value: impl Into<String>) -> Self {
        Self {
            eq: Some(value.into()),
            ..Default::default()
        }
    }
}

/// String shape plus range operators against a timestamp column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberMetaQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<RangeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<RangeValue>,
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_list: Option<Vec<RangeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_in: Option<Vec<RangeValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<RangeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<RangeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<RangeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<RangeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<(RangeValue, RangeValue)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletedAtQuery {
    #[serde(flatten)]
    pub range: NumberMetaQuery,
    /// `true` selects soft-deleted rows, `false` active ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NumberMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NumberMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<StringMetaQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_index: Option<bool>,
    /// Matches when the stored allow-list contains the value(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_to_index: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DeletedAtQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<StringMetaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by_type: Option<StringMetaQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjQuery {
    pub app_id: String,
    #[serde(default)]
    pub part_query: PartQuery,
    #[serde(default)]
    pub meta_query: MetaQuery,
    #[serde(default)]
    pub top_level_fields: TopLevelFields,
}

impl ObjQuery {
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.part_query.and.push(predicate);
        self
    }

    pub fn or(mut self, predicate: Predicate) -> Self {
        self.part_query.or.push(predicate);
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.app_id.is_empty() {
            return Err(QueryError::InvalidFilter("appId is required".into()));
        }
        self.part_query
            .and
            .iter()
            .chain(&self.part_query.or)
            .try_for_each(Predicate::validate)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// A top-level column (`createdAt`, `tag`, ...) or `objRecord.<path>`.
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}
