//! Backend driver adapters.
//!
//! Each backend family implements [`BackendDriver`]. Dialect quirks
//! (placeholder syntax, identifier quoting, native error codes, read-only
//! session settings) live entirely inside the adapter; the pool and the
//! executor only see the trait.

pub mod classify;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use classify::{StatementKind, classify_sql};
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::db::normalize::{RawColumn, RawResult};
use crate::db::params::BoundStatement;
use crate::db::types::RowToValues;
use crate::error::DbResult;
use crate::models::{BackendKind, DatabaseDescriptor, QueryParams, SchemaInfo, Value};
use async_trait::async_trait;
use futures_util::{Stream, TryStreamExt};

/// Per-call execution settings handed to a driver.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub kind: StatementKind,
    /// Rows beyond this are dropped and the result is marked truncated
    pub row_limit: usize,
}

/// Capability interface of one backend family.
#[async_trait]
pub trait BackendDriver: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn kind(&self) -> BackendKind;

    /// Fail-closed classification using the backend's own dialect.
    fn classify_statement(&self, sql: &str) -> StatementKind;

    /// Rewrite named placeholders and order the values for binding.
    fn bind(&self, sql: &str, params: &QueryParams) -> DbResult<BoundStatement>;

    async fn open(&self, descriptor: &DatabaseDescriptor) -> DbResult<Self::Connection>;

    async fn ping(&self, conn: &mut Self::Connection) -> bool;

    async fn execute(
        &self,
        conn: &mut Self::Connection,
        statement: &BoundStatement,
        options: ExecOptions,
    ) -> DbResult<RawResult>;

    async fn introspect(
        &self,
        conn: &mut Self::Connection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo>;

    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Rows read from a stream, stopping one past `limit`.
pub(crate) struct FetchedRows {
    pub columns: Option<Vec<RawColumn>>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

/// Drain at most `limit` rows from a sqlx row stream.
pub(crate) async fn fetch_limited<R, S>(mut stream: S, limit: usize) -> Result<FetchedRows, sqlx::Error>
where
    R: RowToValues,
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    let mut fetched = FetchedRows {
        columns: None,
        rows: Vec::new(),
        truncated: false,
    };
    while let Some(row) = stream.try_next().await? {
        if fetched.rows.len() >= limit {
            fetched.truncated = true;
            break;
        }
        if fetched.columns.is_none() {
            fetched.columns = Some(row.raw_columns());
        }
        fetched.rows.push(row.to_values());
    }
    Ok(fetched)
}
