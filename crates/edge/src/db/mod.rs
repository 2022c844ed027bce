pub mod sqlite;

use adapt::sql::{SqlExec, SqlRow, SqlValue, Stmt};
use adapt::storage::{Result, StorageError};
use async_trait::async_trait;
use domain::setting::StoreSettings;
use sqlite::{Bind, SqliteDbError};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, Sqlite, SqlitePool, Transaction, Type, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::sync::Mutex;

type SharedTx = Arc<Mutex<Option<Transaction<'static, Sqlite>>>>;

/// `SqlExec` over a sqlx SQLite pool. `begin` yields a clone pinned to one
/// pooled connection until `commit`/`rollback`; a transaction dropped
/// unfinished is rolled back by sqlx.
#[derive(Clone)]
pub struct SqliteExec {
    pool: SqlitePool,
    tx: Option<SharedTx>,
}

impl std::fmt::Debug for SqliteExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExec")
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

impl SqliteExec {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, tx: None }
    }

    pub async fn connect(settings: &StoreSettings) -> Result<Self> {
        Ok(Self::new(sqlite::connect(settings).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn finish(&self, commit: bool) -> Result<()> {
        let Some(shared) = &self.tx else {
            return Ok(());
        };
        let tx = shared
            .lock()
            .await
            .take()
            .ok_or(StorageError::TransactionClosed)?;
        if commit {
            tx.commit().await.map_err(SqliteDbError::src)?;
        } else {
            tx.rollback().await.map_err(SqliteDbError::src)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExec for SqliteExec {
    async fn execute(&self, stmts: Vec<Stmt>) -> Result<Vec<u64>> {
        let mapped = stmts.into_iter().map(to_binds).collect();
        let counts = match &self.tx {
            Some(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(StorageError::TransactionClosed)?;
                sqlite::exec_batch(&mut **tx, mapped).await?
            }
            None => {
                let mut conn = self.pool.acquire().await.map_err(SqliteDbError::from)?;
                sqlite::exec_batch(&mut conn, mapped).await?
            }
        };
        Ok(counts)
    }

    async fn fetch(&self, stmt: Stmt) -> Result<Vec<SqlRow>> {
        let statement = to_binds(stmt);
        let rows = match &self.tx {
            Some(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(StorageError::TransactionClosed)?;
                sqlite::fetch_all(&mut **tx, statement).await?
            }
            None => {
                let mut conn = self.pool.acquire().await.map_err(SqliteDbError::from)?;
                sqlite::fetch_all(&mut conn, statement).await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(decode_row(row)?);
        }
        Ok(out)
    }

    async fn begin(&self) -> Result<Self> {
        if self.tx.is_some() {
            return Err(StorageError::InvalidArgument(
                "nested transactions are not supported".into(),
            ));
        }
        let tx = self.pool.begin().await.map_err(SqliteDbError::src)?;
        Ok(Self {
            pool: self.pool.clone(),
            tx: Some(Arc::new(Mutex::new(Some(tx)))),
        })
    }

    async fn commit(&self) -> Result<()> {
        self.finish(true).await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish(false).await
    }
}

// -------------------- helpers --------------------

fn to_binds(stmt: Stmt) -> (String, Vec<Bind>) {
    (
        stmt.sql,
        stmt.values.into_iter().map(sqlvalue_to_bind).collect(),
    )
}

fn sqlvalue_to_bind(v: SqlValue) -> Bind {
    match v {
        SqlValue::Null => Bind::Null,
        SqlValue::Text(s) => Bind::Text(s),
        SqlValue::Long(i) => Bind::Integer(i),
        SqlValue::Bool(b) => Bind::Integer(if b { 1 } else { 0 }), // SQLite bool as INTEGER
        SqlValue::Blob(b) => Bind::Blob(b),
        SqlValue::Double(f) => Bind::Real(f),
    }
}

fn decode_row(row: &SqliteRow) -> std::result::Result<SqlRow, SqliteDbError> {
    let mut row_map = SqlRow::with_capacity(row.columns().len());

    for col in row.columns() {
        let name = col.name();

        let raw = row.try_get_raw(name).map_err(SqliteDbError::src)?;
        if raw.is_null() {
            row_map.insert(name.to_string(), SqlValue::Null);
            continue;
        }

        let declared = col.type_info();
        let runtime = raw.type_info();
        let declared_is_bool = declared.name().to_ascii_uppercase().contains("BOOL");

        let val = if declared_is_bool {
            SqlValue::Bool(row.try_get(name).map_err(SqliteDbError::src)?)
        } else if <i64 as Type<Sqlite>>::compatible(&runtime) {
            SqlValue::Long(row.try_get(name).map_err(SqliteDbError::src)?)
        } else if <f64 as Type<Sqlite>>::compatible(&runtime) {
            SqlValue::Double(row.try_get(name).map_err(SqliteDbError::src)?)
        } else if <String as Type<Sqlite>>::compatible(&runtime) {
            SqlValue::Text(row.try_get(name).map_err(SqliteDbError::src)?)
        } else if <Vec<u8> as Type<Sqlite>>::compatible(&runtime) {
            SqlValue::Blob(row.try_get(name).map_err(SqliteDbError::src)?)
        } else {
            return Err(SqliteDbError::msg(format!(
                "unhandled SQLite type for column `{}`: declared={:?}, runtime={:?}",
                name, declared, runtime
            )));
        };

        row_map.insert(name.to_string(), val);
    }

    Ok(row_map)
}
