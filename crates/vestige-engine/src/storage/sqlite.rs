//! Embedded SQLite backend
//!
//! Wraps a rusqlite connection behind the async [`Database`] contract. The
//! driver itself is synchronous; statements are short and the connection is
//! serialized behind a tokio mutex, so each call completes without blocking
//! the runtime for longer than a local disk write.
//!
//! Tenancy: SQLite has no row-level security, so every SELECT/UPDATE/DELETE
//! against a tenant table is rewritten centrally to carry a
//! `tenant_id = ?` predicate bound to the handle's tenant.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{EngineError, Result};
use crate::storage::tenancy::scope_statement;
use crate::storage::{
    schema, Database, QueryResult, Row, SqlValue, Statement, Transaction, SCHEMA_BATCH_LIMIT,
};

/// Embedded SQLite implementation of [`Database`].
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    tenant_id: String,
    closed: Arc<AtomicBool>,
}

impl SqliteDatabase {
    /// Open (or create) a database file and bind the handle to a tenant.
    pub async fn open(path: PathBuf, tenant_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(&path).map_err(map_sqlite_error)?;
        Self::from_connection(conn, tenant_id).await
    }

    /// In-memory database, for tests and ephemeral tenants.
    pub async fn in_memory(tenant_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::from_connection(conn, tenant_id).await
    }

    async fn from_connection(conn: Connection, tenant_id: impl Into<String>) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(map_sqlite_error)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            tenant_id: tenant_id.into(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create tables, indices, FTS, and triggers. Runs in batches within the
    /// service limit; "already exists" failures are ignored per statement.
    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        for chunk in schema::sqlite_schema().chunks(SCHEMA_BATCH_LIMIT) {
            for statement in chunk {
                match conn.execute_batch(statement) {
                    Ok(_) => {}
                    Err(err) if err.to_string().contains("already exists") => {
                        tracing::debug!("schema statement skipped: {}", err);
                    }
                    Err(err) => return Err(map_sqlite_error(err)),
                }
            }
        }
        tracing::debug!(tenant = %self.tenant_id, "sqlite schema ready");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.check_open()?;
        let conn = self.conn.lock().await;
        run_statement(&conn, &self.tenant_id, sql, params)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params).await?.rows)
    }

    async fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.execute(sql, params).await?.rows.into_iter().next())
    }

    async fn batch(&self, statements: &[Statement]) -> Result<Vec<QueryResult>> {
        self.check_open()?;
        let conn = self.conn.lock().await;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(run_statement(
                &conn,
                &self.tenant_id,
                &statement.sql,
                &statement.params,
            )?);
        }
        Ok(results)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.check_open()?;
        let guard = self.conn.clone().lock_owned().await;
        guard
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteTransaction {
            guard,
            tenant_id: self.tenant_id.clone(),
            finished: false,
        }))
    }

    async fn is_healthy(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

struct SqliteTransaction {
    guard: OwnedMutexGuard<Connection>,
    tenant_id: String,
    finished: bool,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        run_statement(&self.guard, &self.tenant_id, sql, params)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.guard.execute_batch("COMMIT").map_err(map_sqlite_error)?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.guard
            .execute_batch("ROLLBACK")
            .map_err(map_sqlite_error)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned scope: roll back so the connection is reusable
            let _ = self.guard.execute_batch("ROLLBACK");
        }
    }
}

// ============================================================================
// STATEMENT EXECUTION
// ============================================================================

fn run_statement(
    conn: &Connection,
    tenant_id: &str,
    sql: &str,
    params: &[SqlValue],
) -> Result<QueryResult> {
    let scoped = scope_statement(sql, params, tenant_id);
    let mut stmt = conn.prepare(&scoped.sql).map_err(map_sqlite_error)?;
    let bound: Vec<rusqlite::types::Value> =
        scoped.params.iter().map(to_sqlite_value).collect();
    let param_refs: Vec<&dyn rusqlite::ToSql> =
        bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

    if stmt.column_count() > 0 {
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query(param_refs.as_slice())
            .map_err(map_sqlite_error)?;
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut cells = Vec::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i).map_err(map_sqlite_error)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Integer(v),
                    ValueRef::Real(v) => SqlValue::Real(v),
                    ValueRef::Text(bytes) => {
                        SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                    ValueRef::Blob(bytes) => {
                        SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                };
                cells.push((name.clone(), value));
            }
            rows_out.push(Row::from_cells(cells));
        }
        Ok(QueryResult {
            rows: rows_out,
            rows_affected: 0,
            last_insert_id: None,
        })
    } else {
        let affected = stmt
            .execute(param_refs.as_slice())
            .map_err(map_sqlite_error)?;
        Ok(QueryResult {
            rows: Vec::new(),
            rows_affected: affected as u64,
            last_insert_id: Some(conn.last_insert_rowid()),
        })
    }
}

fn to_sqlite_value(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Bool(v) => Value::Integer(*v as i64),
        // Millisecond precision, always-Z: lexicographic order matches
        // chronological order in TEXT comparisons
        SqlValue::Timestamp(t) => Value::Text(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        SqlValue::Json(v) => Value::Text(v.to_string()),
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> EngineError {
    use rusqlite::ErrorCode;
    match &err {
        rusqlite::Error::SqliteFailure(code, _) => match code.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted => {
                EngineError::TransientDriver(err.to_string())
            }
            _ => EngineError::PermanentDriver(err.to_string()),
        },
        _ => EngineError::PermanentDriver(err.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
