//! PostgreSQL adapter.

use super::{BackendDriver, ExecOptions, StatementKind, classify_sql, fetch_limited};
use crate::db::normalize::RawResult;
use crate::db::params::{BoundStatement, PlaceholderStyle, bind_postgres_param, bind_statement};
use crate::db::schema;
use crate::db::types::describe_columns;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionTarget, DatabaseDescriptor, QueryParams, SchemaInfo};
use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor, Statement};
use std::str::FromStr;

/// SQLSTATEs after which the session is gone: class 08 (connection
/// exception) and the admin/crash shutdown codes.
pub fn is_severed(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

pub fn map_error(err: sqlx::Error) -> DbError {
    DbError::from_sqlx(err, is_severed)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn connect_options(descriptor: &DatabaseDescriptor) -> DbResult<PgConnectOptions> {
        let options = match &descriptor.target {
            ConnectionTarget::Url(url) => {
                PgConnectOptions::from_str(url.expose()).map_err(DbError::from_sqlx_connect)?
            }
            ConnectionTarget::Network {
                host,
                port,
                database,
                username,
                password,
            } => {
                let mut options = PgConnectOptions::new().host(host);
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
                    "database '{}': PostgreSQL needs a network target, not a file path",
                    descriptor.alias
                )));
            }
        };

        let options = options.application_name(env!("CARGO_PKG_NAME"));
        if descriptor.is_read_only() {
            Ok(options.options([("default_transaction_read_only", "on")]))
        } else {
            Ok(options)
        }
    }
}

#[async_trait]
impl BackendDriver for PostgresDriver {
    type Connection = PgConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn classify_statement(&self, sql: &str) -> StatementKind {
        classify_sql(sql, &PostgreSqlDialect {})
    }

    fn bind(&self, sql: &str, params: &QueryParams) -> DbResult<BoundStatement> {
        bind_statement(sql, params, &PostgreSqlDialect {}, PlaceholderStyle::Dollar)
    }

    async fn open(&self, descriptor: &DatabaseDescriptor) -> DbResult<PgConnection> {
        let options = Self::connect_options(descriptor)?;
        PgConnection::connect_with(&options)
            .await
            .map_err(DbError::from_sqlx_connect)
    }

    async fn ping(&self, conn: &mut PgConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        statement: &BoundStatement,
        options: ExecOptions,
    ) -> DbResult<RawResult> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.values {
            query = bind_postgres_param(query, value);
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
                describe_columns(prepared.columns(), BackendKind::Postgres)
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
        conn: &mut PgConnection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        schema::postgres::introspect(conn, target).await
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "PostgreSQL connection did not close cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessMode, Credential, PoolLimits, Secret};

    fn descriptor(access_mode: AccessMode) -> DatabaseDescriptor {
        DatabaseDescriptor {
            alias: "pg".into(),
            kind: BackendKind::Postgres,
            target: ConnectionTarget::Network {
                host: "db.internal".into(),
                port: Some(6543),
                database: Some("app".into()),
                username: Some("reader".into()),
                password: Some(Credential::Inline(Secret::new("pw"))),
            },
            access_mode,
            pool: PoolLimits::default(),
            statement_timeout: None,
            description: None,
        }
    }

    #[test]
    fn test_severed_codes() {
        assert!(is_severed("08006"));
        assert!(is_severed("57P01"));
        assert!(!is_severed("23505"));
        assert!(!is_severed("42601"));
    }

    #[test]
    fn test_connect_options_from_network_target() {
        let options = PostgresDriver::connect_options(&descriptor(AccessMode::ReadOnly)).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("app"));
        assert_eq!(options.get_username(), "reader");
        assert!(
            options
                .get_options()
                .is_some_and(|o| o.contains("default_transaction_read_only"))
        );
    }

    #[test]
    fn test_read_write_session_has_no_read_only_option() {
        let options = PostgresDriver::connect_options(&descriptor(AccessMode::ReadWrite)).unwrap();
        assert!(options.get_options().is_none());
    }

    #[test]
    fn test_file_target_rejected() {
        let mut desc = descriptor(AccessMode::ReadOnly);
        desc.target = ConnectionTarget::File {
            path: "/tmp/x.db".into(),
        };
        assert!(PostgresDriver::connect_options(&desc).is_err());
    }

    #[test]
    fn test_named_params_use_dollar_placeholders() {
        let params = QueryParams::Named(
            [("id".to_string(), crate::models::QueryParam::Int(1))].into(),
        );
        let bound = PostgresDriver.bind("SELECT * FROM t WHERE id = :id", &params).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id = $1");
    }
}
