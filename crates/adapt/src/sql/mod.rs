//! Relational backend: SeaQuery statement builders for the `objs`,
//! `obj_parts` and `obj_fields` tables, and the `ObjBackend` that runs them
//! through an `SqlExec` port. No driver types leak past this module.

pub mod backend;
pub mod compile;
pub mod parts;
pub mod schema;
pub mod stmt;

use async_trait::async_trait;
use sea_query::Value;
use std::collections::HashMap;

use crate::storage::Result;

pub use backend::SqlObjBackend;
pub use compile::SqlCompiler;

/// Logical bind values the infra layer translates to its own binder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Long(i64),
    Bool(bool),
    Double(f64),
    Blob(Vec<u8>),
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Bool(Some(b)) => SqlValue::Bool(b),
            Value::TinyInt(Some(i)) => SqlValue::Long(i.into()),
            Value::SmallInt(Some(i)) => SqlValue::Long(i.into()),
            Value::Int(Some(i)) => SqlValue::Long(i.into()),
            Value::BigInt(Some(i)) => SqlValue::Long(i),
            Value::TinyUnsigned(Some(i)) => SqlValue::Long(i.into()),
            Value::SmallUnsigned(Some(i)) => SqlValue::Long(i.into()),
            Value::Unsigned(Some(i)) => SqlValue::Long(i.into()),
            Value::BigUnsigned(Some(i)) => SqlValue::Long(i64::try_from(i).unwrap_or(i64::MAX)),
            Value::Float(Some(f)) => SqlValue::Double(f.into()),
            Value::Double(Some(f)) => SqlValue::Double(f),
            Value::String(Some(s)) => SqlValue::Text(*s),
            Value::Char(Some(c)) => SqlValue::Text(c.to_string()),
            Value::Bytes(Some(b)) => SqlValue::Blob(*b),
            _ => SqlValue::Null,
        }
    }
}

/// One SQL statement with positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Stmt {
    pub fn new(sql: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// Convert a SeaQuery `build()` result.
    pub fn built((sql, values): (String, sea_query::Values)) -> Self {
        Self {
            sql,
            values: values.0.into_iter().map(SqlValue::from).collect(),
        }
    }
}

/// A fetched row keyed by column name.
pub type SqlRow = HashMap<String, SqlValue>;

/// Port implemented by the infra layer.
#[async_trait]
pub trait SqlExec: Send + Sync {
    /// Run all statements atomically; returns rows affected per statement.
    async fn execute(&self, stmts: Vec<Stmt>) -> Result<Vec<u64>>;

    async fn fetch(&self, stmt: Stmt) -> Result<Vec<SqlRow>>;

    /// Executor bound to a new transaction.
    async fn begin(&self) -> Result<Self>
    where
        Self: Sized;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sea_values_map_to_sql_values() {
        assert_eq!(SqlValue::from(Value::Int(Some(7))), SqlValue::Long(7));
        assert_eq!(
            SqlValue::from(Value::BigUnsigned(Some(u64::MAX))),
            SqlValue::Long(i64::MAX)
        );
        assert_eq!(
            SqlValue::from(Value::String(Some(Box::new("x".into())))),
            SqlValue::Text("x".into())
        );
        assert_eq!(SqlValue::from(Value::String(None)), SqlValue::Null);
        assert_eq!(SqlValue::from(Value::Bool(Some(true))), SqlValue::Bool(true));
    }
}
