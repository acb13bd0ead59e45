//! Storage abstraction
//!
//! One contract, two backends:
//! - `SqliteDatabase`: embedded, synchronous driver, tenant scoping applied
//!   by rewriting every statement centrally
//! - `PostgresDatabase`: hosted, row-level security bound to the session
//!   identity, SQLite-dialect queries rewritten on the way in
//!
//! The engine authors all SQL in the SQLite dialect against the logical
//! table names (`knowledge_nodes`, `people`, `graph_edges`, `intentions`,
//! `vestige_metadata`). Backends own the translation to whatever their
//! dialect and physical schema need.
//!
//! Only this layer is async; everything above it that doesn't touch storage
//! stays synchronous.

mod dialect;
mod postgres;
mod schema;
mod sqlite;
mod tenancy;

pub use dialect::rewrite_to_postgres;
pub use postgres::PostgresDatabase;
pub use schema::{postgres_schema, sqlite_schema, SCHEMA_BATCH_LIMIT};
pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};

// ============================================================================
// VALUES & ROWS
// ============================================================================

/// A parameter or cell value crossing the storage boundary.
///
/// Timestamps and JSON get their own variants so each backend can bind them
/// natively (RFC-3339 text in SQLite, `timestamptz`/`jsonb` in Postgres).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    /// Convenience for optional timestamps.
    pub fn from_opt_timestamp(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(t) => SqlValue::Timestamp(t),
            None => SqlValue::Null,
        }
    }

    /// Convenience for optional text.
    pub fn from_opt_text(value: Option<String>) -> Self {
        match value {
            Some(t) => SqlValue::Text(t),
            None => SqlValue::Null,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

/// A result row: named cells in query order.
#[derive(Debug, Clone, Default)]
pub struct Row {
    cells: Vec<(String, SqlValue)>,
}

impl Row {
    /// Build a row from named cells.
    pub fn from_cells(cells: Vec<(String, SqlValue)>) -> Self {
        Self { cells }
    }

    fn cell(&self, name: &str) -> Result<&SqlValue> {
        self.cells
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| EngineError::SchemaMismatch(format!("missing column: {}", name)))
    }

    /// Text cell. Errors if missing or NULL.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.cell(name)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    /// Optional text cell.
    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.cell(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s)),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    /// Integer cell. Accepts SQLite's 0/1 booleans.
    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.cell(name)? {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Bool(b) => Ok(*b as i64),
            other => Err(type_mismatch(name, "integer", other)),
        }
    }

    /// Float cell. Accepts integers (SQLite stores whole floats as INTEGER).
    pub fn get_f64(&self, name: &str) -> Result<f64> {
        match self.cell(name)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(type_mismatch(name, "real", other)),
        }
    }

    /// Boolean cell. Accepts SQLite's integer form.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.cell(name)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Integer(v) => Ok(*v != 0),
            other => Err(type_mismatch(name, "boolean", other)),
        }
    }

    /// Timestamp cell. Accepts native timestamps or RFC-3339 text.
    pub fn get_datetime(&self, name: &str) -> Result<DateTime<Utc>> {
        match self.cell(name)? {
            SqlValue::Timestamp(t) => Ok(*t),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    EngineError::SchemaMismatch(format!("column {}: bad timestamp: {}", name, e))
                }),
            other => Err(type_mismatch(name, "timestamp", other)),
        }
    }

    /// Optional timestamp cell.
    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.cell(name)? {
            SqlValue::Null => Ok(None),
            _ => self.get_datetime(name).map(Some),
        }
    }

    /// JSON cell. Accepts native JSON or text that parses as JSON.
    pub fn get_json(&self, name: &str) -> Result<serde_json::Value> {
        match self.cell(name)? {
            SqlValue::Json(v) => Ok(v.clone()),
            SqlValue::Text(s) => serde_json::from_str(s).map_err(|e| {
                EngineError::SchemaMismatch(format!("column {}: bad json: {}", name, e))
            }),
            SqlValue::Null => Ok(serde_json::Value::Null),
            other => Err(type_mismatch(name, "json", other)),
        }
    }

    /// JSON string-array cell, tolerating NULL as empty.
    pub fn get_string_array(&self, name: &str) -> Result<Vec<String>> {
        match self.get_json(name)? {
            serde_json::Value::Null => Ok(Vec::new()),
            serde_json::Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()),
            other => Err(EngineError::SchemaMismatch(format!(
                "column {}: expected json array, got {}",
                name, other
            ))),
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True when the row carries no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn type_mismatch(name: &str, expected: &str, got: &SqlValue) -> EngineError {
    EngineError::SchemaMismatch(format!(
        "column {}: expected {}, got {:?}",
        name, expected, got
    ))
}

/// Result of a write operation.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Rows produced, if the statement returns any
    pub rows: Vec<Row>,
    /// Rows affected by the statement
    pub rows_affected: u64,
    /// Rowid of the inserted row, when the driver reports one
    pub last_insert_id: Option<i64>,
}

/// A statement plus its parameters, for batching.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

// ============================================================================
// DATABASE CONTRACT
// ============================================================================

/// A transaction scope. Statements run serialized; either everything commits
/// or everything rolls back. Dropping an unfinished transaction rolls back.
#[async_trait]
pub trait Transaction: Send {
    /// Run one statement inside the transaction.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Commit. Consumes the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back. Consumes the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The storage contract. All operations are implicitly scoped to the tenant
/// bound at construction; no statement can read or write another tenant's
/// rows.
#[async_trait]
pub trait Database: Send + Sync {
    /// The tenant this handle is bound to.
    fn tenant_id(&self) -> &str;

    /// Run one statement, returning rows and write metadata.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Run a read, returning all rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a read, returning the first row if any.
    async fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>>;

    /// Run several statements back to back (not atomically; use
    /// [`Database::begin`] for atomicity).
    async fn batch(&self, statements: &[Statement]) -> Result<Vec<QueryResult>>;

    /// Open a transaction scope. Transactions are never retried by the
    /// storage layer; retry policy belongs to the caller.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Whether the underlying driver still answers.
    async fn is_healthy(&self) -> bool;

    /// Close the handle. Idempotent; later operations fail with
    /// [`EngineError::ConnectionClosed`].
    async fn close(&self) -> Result<()>;
}

/// Run `f`'s statements inside a transaction: commit on Ok, roll back and
/// propagate on Err.
///
/// The closure receives the open transaction and returns the statements'
/// outcome; this helper owns the commit/rollback bookkeeping so call sites
/// can't forget it.
pub async fn with_transaction<T, F>(db: &dyn Database, f: F) -> Result<T>
where
    F: for<'t> FnOnce(
            &'t mut dyn Transaction,
        )
            -> std::pin::Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>
        + Send,
    T: Send,
{
    let mut tx = db.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            // Roll back, but surface the original failure
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
