//! SQLite adapter.

use super::{BackendDriver, ExecOptions, StatementKind, classify_sql, fetch_limited};
use crate::db::normalize::RawResult;
use crate::db::params::{BoundStatement, PlaceholderStyle, bind_sqlite_param, bind_statement};
use crate::db::schema;
use crate::db::types::describe_columns;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionTarget, DatabaseDescriptor, QueryParams, SchemaInfo};
use async_trait::async_trait;
use sqlparser::dialect::SQLiteDialect;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Executor, Statement};
use std::str::FromStr;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary result codes after which the file handle is unusable:
/// SQLITE_IOERR, SQLITE_CORRUPT, SQLITE_CANTOPEN and SQLITE_NOTADB.
/// Extended codes carry the primary code in their low byte.
pub fn is_severed(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 10 | 11 | 14 | 26))
        .unwrap_or(false)
}

pub fn map_error(err: sqlx::Error) -> DbError {
    DbError::from_sqlx(err, is_severed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Read-only aliases open the file with `SQLITE_OPEN_READONLY`;
    /// read-write aliases create the file if it does not exist.
    pub fn connect_options(descriptor: &DatabaseDescriptor) -> DbResult<SqliteConnectOptions> {
        let options = match &descriptor.target {
            ConnectionTarget::File { path } => SqliteConnectOptions::new().filename(path),
            ConnectionTarget::Url(url) => {
                SqliteConnectOptions::from_str(url.expose()).map_err(DbError::from_sqlx_connect)?
            }
            ConnectionTarget::Network { .. } => {
                return Err(DbError::config(format!(
                    "database '{}': SQLite needs a file path, not a network target",
                    descriptor.alias
                )));
            }
        };
        let read_only = descriptor.is_read_only();
        Ok(options
            .read_only(read_only)
            .create_if_missing(!read_only)
            .busy_timeout(BUSY_TIMEOUT))
    }
}

#[async_trait]
impl BackendDriver for SqliteDriver {
    type Connection = SqliteConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn classify_statement(&self, sql: &str) -> StatementKind {
        classify_sql(sql, &SQLiteDialect {})
    }

    fn bind(&self, sql: &str, params: &QueryParams) -> DbResult<BoundStatement> {
        bind_statement(sql, params, &SQLiteDialect {}, PlaceholderStyle::Question)
    }

    async fn open(&self, descriptor: &DatabaseDescriptor) -> DbResult<SqliteConnection> {
        let options = Self::connect_options(descriptor)?;
        SqliteConnection::connect_with(&options)
            .await
            .map_err(DbError::from_sqlx_connect)
    }

    async fn ping(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        statement: &BoundStatement,
        options: ExecOptions,
    ) -> DbResult<RawResult> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.values {
            query = bind_sqlite_param(query, value);
        }

        if !options.kind.is_read() {
            let done = query.execute(&mut *conn).await.map_err(map_error)?;
            return Ok(RawResult::affected(done.rows_affected()));
        }

        let fetched = fetch_limited(query.fetch(&mut *conn), options.row_limit)
            .await
            .map_err(map_error)?;
        let columns = match fetched.columns {
            Some(columns) => columns,
            None => {
                let prepared = (&mut *conn).prepare(&statement.sql).await.map_err(map_error)?;
                describe_columns(prepared.columns(), BackendKind::Sqlite)
            }
        };
        Ok(RawResult {
            columns,
            rows: fetched.rows,
            rows_affected: None,
            truncated: fetched.truncated,
        })
    }

    async fn introspect(
        &self,
        conn: &mut SqliteConnection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        schema::sqlite::introspect(conn, target).await
    }

    async fn close(&self, conn: SqliteConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "SQLite connection did not close cleanly");
        }
    }
}
