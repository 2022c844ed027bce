use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    #[error("invalid sort spec: {0}")]
    InvalidSort(String),

    #[error("invalid predicate on `{field}`: {msg}")]
    InvalidPredicate { field: String, msg: String },

    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueryError {
    pub fn predicate(field: &str, msg: impl Into<String>) -> Self {
        QueryError::InvalidPredicate {
            field: field.to_owned(),
            msg: msg.into(),
        }
    }
}
