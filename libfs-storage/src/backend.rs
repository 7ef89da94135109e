//! Storage Backend — opens a single-file relational store and exposes a
//! small, backend-agnostic `execute`/`columns`/`commit` surface over it.
//!
//! Grounded on `sqlite3_be.py`'s `db_backend` (open/execute_statment/
//! get_columns/commit), with an owned-connection pool-setup idiom. One
//! connection per process; every access is serialized through this struct,
//! matching the single-worker upcall model.

use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, Connection, Row, SqliteConnection, TypeInfo};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use tokio::sync::Mutex;

use crate::error::{map_sqlx_error, Result, StorageError};

/// A bound parameter to a statement. Every catalog column is `TEXT`; inodes
/// are the one `INTEGER` column the engine ever binds directly.
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<u64> for Param {
    fn from(v: u64) -> Self {
        Param::Int(v as i64)
    }
}

/// A fetched row, stringified column-by-column the way the original
/// backend's `fetchall()` handed back plain Python tuples.
pub type FetchedRow = Vec<String>;

pub struct Backend {
    conn: Mutex<SqliteConnection>,
}

fn connection_regex() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(r"^(\S+)://(?:([^:@]*)(?::([^@]*))?@)?(.*)$").expect("valid regex")
    })
}

/// Resolve a `<scheme>://[user[:pw]][@host]/<db-path>` connection string
/// down to a filesystem path. Parse failure falls back to treating the
/// whole string as a bare sqlite path, provided the path (or its parent
/// directory, for a library about to be created) exists — the exact
/// fallback rule in `business_logic.py::__init__`.
pub fn resolve_db_path(connection_string: &str) -> Result<String> {
    if let Some(caps) = connection_regex().captures(connection_string) {
        let scheme = &caps[1];
        let path = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        if scheme != "sqlite3" && scheme != "sqlite" {
            return Err(StorageError::UnsupportedScheme(scheme.to_string()));
        }
        return Ok(path.to_string());
    }

    let path = Path::new(connection_string);
    let parent_exists = path
        .parent()
        .map(|p| p.as_os_str().is_empty() || p.is_dir())
        .unwrap_or(false);
    if path.exists() || parent_exists {
        Ok(connection_string.to_string())
    } else {
        Err(StorageError::InvalidPath(connection_string.to_string()))
    }
}

impl Backend {
    /// Opens a connection, creating the database file if it does not yet
    /// exist. Table setup is the caller's responsibility (see
    /// `Catalog::bootstrap`) — the backend itself only owns the connection.
    pub async fn open(connection_string: &str) -> Result<Self> {
        if connection_string == ":memory:" {
            return Self::open_in_memory().await;
        }
        let db_path = resolve_db_path(connection_string)?;
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?
            .create_if_missing(true);
        let conn = sqlx::SqliteConnection::connect_with(&options)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-process database, useful for tests and for `update`-then-
    /// `mount` one-shot invocations that don't need persistence.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = sqlx::SqliteConnection::connect("sqlite::memory:")
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs a statement and eagerly fetches every resulting row. Works for
    /// both DDL/DML (empty result) and `SELECT` (stringified rows).
    pub async fn execute(&self, sql: &str, params: &[Param]) -> Result<Vec<FetchedRow>> {
        let mut conn = self.conn.lock().await;
        let mut query = sqlx::query(sql);
        for p in params {
            query = match p {
                Param::Text(s) => query.bind(s.clone()),
                Param::Int(i) => query.bind(*i),
            };
        }
        let rows: Vec<SqliteRow> = query.fetch_all(&mut *conn).await.map_err(map_sqlx_error)?;
        Ok(rows.iter().map(stringify_row).collect())
    }

    /// `PRAGMA table_info` — the ordered column names of a table.
    pub async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let sql = format!("PRAGMA table_info('{table}')");
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    /// No-op: `sqlx`'s connection auto-commits every statement outside an
    /// explicit `BEGIN`, unlike the Python `sqlite3` module this backend is
    /// modeled on. Kept so call sites read identically to a backend that
    /// does buffer writes in a transaction, and so a future switch to
    /// explicit transactions is a localized change.
    pub async fn commit(&self) -> Result<()> {
        Ok(())
    }
}

fn stringify_row(row: &SqliteRow) -> FetchedRow {
    (0..row.len())
        .map(|i| {
            let col = row.column(i);
            match col.type_info().name() {
                "INTEGER" | "BIGINT" => row
                    .try_get::<i64, _>(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                "REAL" | "FLOAT" | "DOUBLE" => row
                    .try_get::<f64, _>(i)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                _ => row.try_get::<String, _>(i).unwrap_or_default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_db_path_accepts_sqlite3_scheme() {
        assert_eq!(
            resolve_db_path("sqlite3:///tmp/library.db").unwrap(),
            "/tmp/library.db"
        );
    }

    #[test]
    fn resolve_db_path_rejects_unknown_scheme() {
        assert!(matches!(
            resolve_db_path("postgres://user:pw@host/db"),
            Err(StorageError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn resolve_db_path_falls_back_to_bare_path_in_existing_dir() {
        let dir = std::env::temp_dir();
        let candidate = dir.join("libfs-resolve-test.db");
        let result = resolve_db_path(candidate.to_str().unwrap()).unwrap();
        assert_eq!(result, candidate.to_str().unwrap());
    }

    #[tokio::test]
    async fn execute_and_columns_round_trip() {
        let backend = Backend::open_in_memory().await.unwrap();
        backend
            .execute("CREATE TABLE t (a TEXT, b INTEGER)", &[])
            .await
            .unwrap();
        backend
            .execute(
                "INSERT INTO t VALUES (?, ?)",
                &[Param::from("hello"), Param::from(7i64)],
            )
            .await
            .unwrap();
        let rows = backend.execute("SELECT a, b FROM t", &[]).await.unwrap();
        assert_eq!(rows, vec![vec!["hello".to_string(), "7".to_string()]]);
        assert_eq!(backend.columns("t").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_unique_key_surfaces_as_unique_violation() {
        let backend = Backend::open_in_memory().await.unwrap();
        backend
            .execute("CREATE TABLE t (a TEXT UNIQUE)", &[])
            .await
            .unwrap();
        backend
            .execute("INSERT INTO t VALUES (?)", &[Param::from("x")])
            .await
            .unwrap();
        let err = backend
            .execute("INSERT INTO t VALUES (?)", &[Param::from("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));
    }
}
