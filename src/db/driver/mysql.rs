//! MySQL / MariaDB adapter.

use super::{BackendDriver, ExecOptions, StatementKind, classify_sql, fetch_limited};
use crate::db::normalize::RawResult;
use crate::db::params::{BoundStatement, PlaceholderStyle, bind_mysql_param, bind_statement};
use crate::db::schema;
use crate::db::types::describe_columns;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionTarget, DatabaseDescriptor, QueryParams, SchemaInfo};
use async_trait::async_trait;
use sqlparser::dialect::MySqlDialect;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor, Statement};
use std::str::FromStr;

/// Session-level read-only mode, applied right after connecting.
const SET_READ_ONLY: &str = "SET SESSION TRANSACTION READ ONLY";

/// SQLSTATEs after which the session is gone: class 08 (connection
/// exception) and 70100 (query or connection killed).
pub fn is_severed(code: &str) -> bool {
    code.starts_with("08") || code == "70100"
}

pub fn map_error(err: sqlx::Error) -> DbError {
    DbError::from_sqlx(err, is_severed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn connect_options(descriptor: &DatabaseDescriptor) -> DbResult<MySqlConnectOptions> {
        let options = match &descriptor.target {
            ConnectionTarget::Url(url) => {
                MySqlConnectOptions::from_str(url.expose()).map_err(DbError::from_sqlx_connect)?
            }
            ConnectionTarget::Network {
                host,
                port,
                database,
                username,
                password,
            } => {
                let mut options = MySqlConnectOptions::new().host(host);
                if let Some(port) = port {
                    options = options.port(*port);
                }
                if let Some(database) = database {
                    options = options.database(database);
                }
                if let Some(username) = username {
                    options = options.username(username);
                }
                if let Some(password) = password {
                    options = options.password(password.resolve()?.expose());
                }
                options
            }
            ConnectionTarget::File { .. } => {
                return Err(DbError::config(format!(
                    "database '{}': MySQL needs a network target, not a file path",
                    descriptor.alias
                )));
            }
        };
        Ok(options.charset("utf8mb4"))
    }
}

#[async_trait]
impl BackendDriver for MySqlDriver {
    type Connection = MySqlConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn classify_statement(&self, sql: &str) -> StatementKind {
        classify_sql(sql, &MySqlDialect {})
    }

    fn bind(&self, sql: &str, params: &QueryParams) -> DbResult<BoundStatement> {
        bind_statement(sql, params, &MySqlDialect {}, PlaceholderStyle::Question)
    }

    async fn open(&self, descriptor: &DatabaseDescriptor) -> DbResult<MySqlConnection> {
        let options = Self::connect_options(descriptor)?;
        let mut conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(DbError::from_sqlx_connect)?;

        if descriptor.is_read_only() {
            if let Err(e) = (&mut conn).execute(SET_READ_ONLY).await {
                let _ = conn.close().await;
                return Err(DbError::from_sqlx_connect(e));
            }
        }
        Ok(conn)
    }

    async fn ping(&self, conn: &mut MySqlConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn execute(
        &self,
        conn: &mut MySqlConnection,
        statement: &BoundStatement,
        options: ExecOptions,
    ) -> DbResult<RawResult> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.values {
            query = bind_mysql_param(query, value);
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
                describe_columns(prepared.columns(), BackendKind::MySql)
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
        conn: &mut MySqlConnection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        schema::mysql::introspect(conn, target).await
    }

    async fn close(&self, conn: MySqlConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "MySQL connection did not close cleanly");
        }
    }
}
