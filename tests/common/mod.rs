//! Scriptable in-memory backend for pool and executor tests.
//!
//! Statement text steers behavior:
//! - contains `pg_sleep`: waits for the configured delay, then answers
//! - contains `fail_backend`: the session is reported as lost
//! - contains `fail_syntax`: an ordinary execution error
//! - anything else: reads return `id`/`name` rows, writes affect one row
//!
//! `ping_ok` and `ping_hangs` script the health check.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlparser::dialect::GenericDialect;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use unified_db::db::driver::{BackendDriver, ExecOptions, StatementKind, classify_sql};
use unified_db::db::normalize::{RawColumn, RawResult};
use unified_db::db::params::BoundStatement;
use unified_db::error::{DbError, DbResult};
use unified_db::models::{
    AccessMode, BackendKind, ColumnType, DatabaseDescriptor, PoolLimits, QueryParams, SchemaInfo,
    Value,
};

#[derive(Debug)]
pub struct MockConn {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockDriver {
    pub delay: Duration,
    pub ping_ok: AtomicBool,
    pub ping_hangs: AtomicBool,
    pub fail_open: AtomicBool,
    pub opened: AtomicU64,
    pub closed: AtomicU64,
    pub executed: AtomicU64,
}

impl MockDriver {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ping_ok: AtomicBool::new(true),
            ping_hangs: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        })
    }

    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendDriver for MockDriver {
    type Connection = MockConn;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn classify_statement(&self, sql: &str) -> StatementKind {
        classify_sql(sql, &GenericDialect {})
    }

    fn bind(&self, sql: &str, _params: &QueryParams) -> DbResult<BoundStatement> {
        Ok(BoundStatement::unbound(sql))
    }

    async fn open(&self, _descriptor: &DatabaseDescriptor) -> DbResult<MockConn> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DbError::connect("connection refused", None));
        }
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConn { id })
    }

    async fn ping(&self, _conn: &mut MockConn) -> bool {
        if self.ping_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.ping_ok.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        _conn: &mut MockConn,
        statement: &BoundStatement,
        options: ExecOptions,
    ) -> DbResult<RawResult> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        let sql = statement.sql.as_str();
        if sql.contains("pg_sleep") {
            tokio::time::sleep(self.delay).await;
        }
        if sql.contains("fail_backend") {
            return Err(DbError::backend_unavailable(
                "server closed the connection",
                Some("57P01".into()),
            ));
        }
        if sql.contains("fail_syntax") {
            return Err(DbError::execution("syntax error", Some("42601".into())));
        }
        if !options.kind.is_read() {
            return Ok(RawResult::affected(1));
        }
        Ok(RawResult {
            columns: vec![
                RawColumn::new("id", ColumnType::Integer),
                RawColumn::new("name", ColumnType::Text),
            ],
            rows: vec![
                vec![Value::Integer(1), Value::Text("a".into())],
                vec![Value::Integer(2), Value::Null],
            ],
            rows_affected: None,
            truncated: false,
        })
    }

    async fn introspect(
        &self,
        _conn: &mut MockConn,
        _target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        Ok(SchemaInfo::Tables { tables: Vec::new() })
    }

    async fn close(&self, conn: MockConn) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        drop(conn);
    }
}

pub fn descriptor(
    access_mode: AccessMode,
    max_size: u32,
    acquire_timeout: Duration,
) -> Arc<DatabaseDescriptor> {
    descriptor_with_limits(
        access_mode,
        PoolLimits {
            max_size,
            idle_timeout: None,
            acquire_timeout,
            max_lifetime: None,
        },
    )
}

pub fn descriptor_with_limits(access_mode: AccessMode, limits: PoolLimits) -> Arc<DatabaseDescriptor> {
    Arc::new(
        DatabaseDescriptor::sqlite("mock", "/nonexistent/mock.db", access_mode).with_pool(limits),
    )
}
