//! Query execution engine.
//!
//! `QueryExecutor::run` is the safety gate in front of every backend:
//!
//! 1. classify the statement with the alias's own driver
//! 2. reject non-reads on read-only aliases before touching the pool
//! 3. bind parameters (values never enter the SQL text)
//! 4. lease a connection and execute under the effective timeout
//! 5. normalize the raw result, or classify the failure
//!
//! A lease whose statement timed out, was cancelled, or hit a severed
//! connection is discarded instead of returning to the idle set.

use crate::config::{DEFAULT_QUERY_TIMEOUT_SECS, MAX_QUERY_TIMEOUT_SECS};
use crate::db::connection_pool::Pool;
use crate::db::driver::{BackendDriver, ExecOptions, StatementKind};
use crate::db::normalize::normalize;
use crate::error::{DbError, to_error_data};
use crate::models::{QueryRequest, QueryResult, SchemaInfo};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A classified failure plus what is known about the statement.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct QueryError {
    pub error: DbError,
    /// `None` when the failure happened before classification
    pub statement: Option<StatementKind>,
}

impl QueryError {
    pub fn new(error: DbError, statement: Option<StatementKind>) -> Self {
        Self { error, statement }
    }

    /// Safe to retry: the failure is transient, and either the statement
    /// only reads or the backend never saw it.
    pub fn retryable(&self) -> bool {
        self.error.is_transient()
            && (self.statement.is_some_and(|k| k.is_read()) || self.error.is_pre_backend())
    }
}

impl From<DbError> for QueryError {
    fn from(error: DbError) -> Self {
        Self::new(error, None)
    }
}

impl From<QueryError> for rmcp::ErrorData {
    fn from(err: QueryError) -> Self {
        to_error_data(&err.error, err.retryable())
    }
}

/// Query executor that handles database query execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    default_timeout: Duration,
    max_timeout: Duration,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(MAX_QUERY_TIMEOUT_SECS),
        }
    }

    /// Create an executor with a custom default and hard ceiling.
    pub fn with_timeouts(default_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            default_timeout: default_timeout.min(max_timeout),
            max_timeout,
        }
    }

    /// min(request or default, per-alias ceiling, hard ceiling)
    pub fn effective_timeout(
        &self,
        requested: Option<Duration>,
        alias_ceiling: Option<Duration>,
    ) -> Duration {
        let mut effective = requested.unwrap_or(self.default_timeout).min(self.max_timeout);
        if let Some(ceiling) = alias_ceiling {
            effective = effective.min(ceiling);
        }
        effective
    }

    /// Run one statement against the pool's alias.
    pub async fn run<D: BackendDriver>(
        &self,
        pool: &Pool<D>,
        request: &QueryRequest,
    ) -> Result<QueryResult, QueryError> {
        let driver = pool.driver();
        let descriptor = pool.descriptor();
        let kind = driver.classify_statement(&request.sql);
        let fail = |error: DbError| QueryError::new(error, Some(kind));

        if descriptor.is_read_only() && !kind.is_read() {
            info!(alias = %descriptor.alias, statement = %kind, "Rejected statement on read-only database");
            return Err(fail(DbError::access_denied(
                descriptor.alias.clone(),
                format!("{kind} statements are not allowed on a read-only database"),
            )));
        }

        let bound = driver.bind(&request.sql, &request.params).map_err(fail)?;
        let limit = request.effective_limit() as usize;
        let deadline = self.effective_timeout(request.timeout, descriptor.statement_timeout);

        debug!(
            alias = %descriptor.alias,
            sql = %request.sql,
            params = bound.values.len(),
            statement = %kind,
            limit,
            timeout_ms = deadline.as_millis() as u64,
            "Executing query"
        );

        let mut lease = pool.acquire().await.map_err(fail)?;
        let connection_id = lease.id();
        lease.mark_in_flight();
        let started = Instant::now();
        let options = ExecOptions {
            kind,
            row_limit: limit,
        };

        let outcome = {
            let conn = lease.connection_mut().map_err(fail)?;
            timeout(deadline, driver.execute(conn, &bound, options)).await
        };

        match outcome {
            Ok(Ok(raw)) => {
                lease.mark_settled();
                let result = normalize(raw, started.elapsed());
                info!(
                    alias = %descriptor.alias,
                    connection_id,
                    rows = result.row_count,
                    rows_affected = ?result.rows_affected,
                    truncated = result.truncated,
                    elapsed_ms = result.execution_time_ms,
                    "Query completed"
                );
                Ok(result)
            }
            Ok(Err(error)) => {
                lease.mark_settled();
                if error.breaks_connection() {
                    lease.mark_broken();
                }
                warn!(
                    alias = %descriptor.alias,
                    connection_id,
                    kind = %error.kind(),
                    code = ?error.native_code(),
                    "Query failed"
                );
                Err(fail(error))
            }
            Err(_) => {
                lease.mark_broken();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(alias = %descriptor.alias, connection_id, elapsed_ms, "Query timed out");
                Err(fail(DbError::timeout("query", elapsed_ms)))
            }
        }
    }

    /// Introspect the alias's schema over one leased connection.
    pub async fn describe<D: BackendDriver>(
        &self,
        pool: &Pool<D>,
        target: Option<&str>,
    ) -> Result<SchemaInfo, QueryError> {
        let fail = |error: DbError| QueryError::new(error, Some(StatementKind::Read));
        let driver = pool.driver();
        let alias = pool.alias();
        let deadline = self.effective_timeout(None, pool.descriptor().statement_timeout);

        let mut lease = pool.acquire().await.map_err(fail)?;
        lease.mark_in_flight();
        let started = Instant::now();
        let outcome = {
            let conn = lease.connection_mut().map_err(fail)?;
            timeout(deadline, driver.introspect(conn, target)).await
        };

        match outcome {
            Ok(Ok(schema)) => {
                lease.mark_settled();
                debug!(alias, schema_target = ?target, elapsed_ms = started.elapsed().as_millis() as u64, "Described schema");
                Ok(schema)
            }
            Ok(Err(error)) => {
                lease.mark_settled();
                if error.breaks_connection() {
                    lease.mark_broken();
                }
                Err(fail(error))
            }
            Err(_) => {
                lease.mark_broken();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(alias, elapsed_ms, "Schema introspection timed out");
                Err(fail(DbError::timeout("describe_schema", elapsed_ms)))
            }
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout() {
        let executor = QueryExecutor::new();
        assert_eq!(executor.effective_timeout(None, None), Duration::from_secs(30));
        assert_eq!(
            executor.effective_timeout(Some(Duration::from_secs(900)), None),
            Duration::from_secs(300)
        );
        assert_eq!(
            executor.effective_timeout(Some(Duration::from_secs(60)), Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            executor.effective_timeout(Some(Duration::from_millis(50)), Some(Duration::from_secs(10))),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_retryable() {
        let read = Some(StatementKind::Read);
        let write = Some(StatementKind::Write);

        assert!(QueryError::new(DbError::timeout("query", 50), read).retryable());
        assert!(!QueryError::new(DbError::timeout("query", 50), write).retryable());
        // The backend never saw a write that could not get a connection
        assert!(QueryError::new(DbError::pool_exhausted("a", 10), write).retryable());
        assert!(!QueryError::new(DbError::execution("syntax error", None), read).retryable());
        assert!(!QueryError::new(DbError::access_denied("a", "write"), write).retryable());
    }

    #[test]
    fn test_error_data_carries_retryable() {
        let err = QueryError::new(DbError::pool_exhausted("a", 10), Some(StatementKind::Read));
        let data: rmcp::ErrorData = err.into();
        let payload = data.data.unwrap();
        assert_eq!(payload["kind"], "pool_exhausted");
        assert_eq!(payload["retryable"], true);
    }
}
