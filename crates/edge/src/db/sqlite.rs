//! sqlite.rs: pool construction and the batch/fetch primitives the
//! `SqliteExec` port implementation is built on.
//! - One pool per store URL, WAL journal, `REGEXP` registered on every connection.
//! - Batches run in one transaction (a savepoint when already inside one)
//!   and roll back on the first failing statement.

use adapt::storage::DbError;
use domain::setting::StoreSettings;
use sqlx::{
    sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    query::Query,
    Connection, Sqlite, SqliteConnection, SqlitePool,
};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SqliteDbError {
    #[error("Connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("SQL execution failed: {0}")]
    Execute(sqlx::Error),

    #[error("Error message: {0}")]
    Message(String),
}

impl SqliteDbError {
    pub fn src(source: sqlx::Error) -> Self {
        SqliteDbError::Execute(source)
    }
    pub fn msg(msg: String) -> Self {
        SqliteDbError::Message(msg)
    }
}

impl DbError for SqliteDbError {}

pub type Result<T, E = SqliteDbError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

/// Open (creating if needed) the store database described by `settings`.
pub async fn connect(settings: &StoreSettings) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&settings.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(settings.busy_timeout_secs.unwrap_or(5)))
        .with_regexp();

    let pool = SqlitePoolOptions::new()
        .min_connections(0)
        .max_connections(settings.max_connections.unwrap_or(4).max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(opts)
        .await?;

    debug!(url = %settings.url, "sqlite pool ready");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────────────────────────
// Binds
// ─────────────────────────────────────────────────────────────────────────────

/// Generic bind values for statements (schema-agnostic).
#[derive(Debug, Clone)]
pub enum Bind {
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Null,
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut q: SqliteQuery<'q>, binds: Vec<Bind>) -> SqliteQuery<'q> {
    for b in binds {
        q = match b {
            Bind::Text(s) => q.bind(s),
            Bind::Integer(i) => q.bind(i),
            Bind::Real(r) => q.bind(r),
            Bind::Blob(b) => q.bind(b),
            Bind::Null => {
                let none: Option<i32> = None;
                q.bind(none)
            }
        };
    }
    q
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// Execute a batch atomically, with **rollback on first error**.
/// Returns rows affected per statement.
pub async fn exec_batch(
    conn: &mut SqliteConnection,
    statements: Vec<(String, Vec<Bind>)>,
) -> Result<Vec<u64>> {
    let mut tx = conn.begin().await.map_err(SqliteDbError::src)?;
    let mut counts = Vec::with_capacity(statements.len());

    for (sql, binds) in statements {
        // dropping `tx` on error rolls the batch back
        let res = bind_all(sqlx::query(&sql), binds)
            .execute(&mut *tx)
            .await
            .map_err(SqliteDbError::src)?;
        counts.push(res.rows_affected());
    }

    tx.commit().await.map_err(SqliteDbError::src)?;
    Ok(counts)
}

pub async fn fetch_all(
    conn: &mut SqliteConnection,
    statement: (String, Vec<Bind>),
) -> Result<Vec<SqliteRow>> {
    let (sql, binds) = statement;
    bind_all(sqlx::query(&sql), binds)
        .fetch_all(conn)
        .await
        .map_err(SqliteDbError::src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use tempfile::tempdir;

    // ── helpers ───────────────────────────────────────────────────────────────

    // Create a unique sqlite:// URL in a temp dir (dir kept alive by return value)
    fn temp_db_url(name: &str) -> (tempfile::TempDir, String) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(format!("{name}.db"));
        let url = format!("sqlite://{}", path.to_string_lossy());
        (dir, url)
    }

    fn settings(url: String) -> StoreSettings {
        StoreSettings {
            url,
            max_connections: Some(2),
            busy_timeout_secs: None,
        }
    }

    // ── tests ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pool_is_wal_and_creates_the_file() -> Result<()> {
        let (dir, url) = temp_db_url("pool_wal");
        let pool = connect(&settings(url)).await?;

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .map_err(SqliteDbError::src)?;
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(dir.path().join("pool_wal.db").exists());
        Ok(())
    }

    #[tokio::test]
    async fn basic_exec_flow_and_reads() -> Result<()> {
        let (_dir, url) = temp_db_url("basic_exec");
        let pool = connect(&settings(url)).await?;
        let mut conn = pool.acquire().await?;

        let counts = exec_batch(
            &mut conn,
            vec![
                (
                    "CREATE TABLE docs(id TEXT PRIMARY KEY, content TEXT NOT NULL, n INTEGER)"
                        .to_string(),
                    vec![],
                ),
                (
                    "INSERT INTO docs(id, content, n) VALUES (?, ?, ?)".to_string(),
                    vec![Bind::Text("alpha".into()), Bind::Text("hello".into()), Bind::Null],
                ),
            ],
        )
        .await?;
        assert_eq!(counts, vec![0, 1]);

        let rows = fetch_all(
            &mut conn,
            ("SELECT content FROM docs WHERE id = ?".to_string(), vec![Bind::Text("alpha".into())]),
        )
        .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String, _>("content"), "hello");
        Ok(())
    }

    #[tokio::test]
    async fn exec_batch_error_rolls_back() -> Result<()> {
        let (_dir, url) = temp_db_url("exec_error_rb");
        let pool = connect(&settings(url)).await?;
        let mut conn = pool.acquire().await?;

        exec_batch(
            &mut conn,
            vec![(
                "CREATE TABLE t(id INTEGER PRIMARY KEY, val TEXT NOT NULL)".to_string(),
                vec![],
            )],
        )
        .await?;

        // First ok, second invalid -> whole batch rolls back (no partial write)
        let res = exec_batch(
            &mut conn,
            vec![
                (
                    "INSERT INTO t(id, val) VALUES (?, ?)".to_string(),
                    vec![Bind::Integer(1), Bind::Text("ok".into())],
                ),
                (
                    "INSERT INTO ttt(id, val) VALUES (?, ?)".to_string(),
                    vec![Bind::Integer(2), Bind::Text("nope".into())],
                ),
            ],
        )
        .await;
        assert!(res.is_err());

        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *conn)
            .await
            .map_err(SqliteDbError::src)?;
        assert_eq!(cnt, 0);
        Ok(())
    }

    #[tokio::test]
    async fn regexp_is_registered() -> Result<()> {
        let (_dir, url) = temp_db_url("regexp");
        let pool = connect(&settings(url)).await?;

        let hit: i64 = sqlx::query_scalar("SELECT 'banana' REGEXP '^ba(na)+$'")
            .fetch_one(&pool)
            .await
            .map_err(SqliteDbError::src)?;
        assert_eq!(hit, 1);
        Ok(())
    }
}
