//! Statement classification for the access-mode gate.
//!
//! Classification is AST-based using each backend's own sqlparser dialect
//! and fails closed: anything not provably a pure read is a write. That
//! covers unparseable text, batches of more than one statement, procedure
//! calls, transaction control, session and administrative statements,
//! `SELECT ... INTO`, locking reads and data-modifying CTEs. A query that
//! calls a function known to change state (sequence advances, session
//! settings, advisory locks, backend signals, extension loading) is a write
//! too, wherever the call appears.

use sqlparser::ast::{
    Expr, ObjectName, Query, SetExpr, Statement, visit_expressions, visit_relations,
};
use std::ops::ControlFlow;
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;

/// What a statement may do to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    Write,
    Ddl,
}

impl StatementKind {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Ddl => "ddl",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `sql` with the given dialect.
pub fn classify_sql(sql: &str, dialect: &dyn Dialect) -> StatementKind {
    let statements = match Parser::parse_sql(dialect, sql) {
        Ok(statements) => statements,
        Err(_) => return StatementKind::Write,
    };
    match statements.as_slice() {
        [single] => classify_statement(single),
        _ => StatementKind::Write,
    }
}

/// Classify one parsed statement.
pub fn classify_statement(stmt: &Statement) -> StatementKind {
    match stmt {
        Statement::Query(query) => {
            if is_pure_read(query) && !calls_side_effecting_function(stmt) {
                StatementKind::Read
            } else {
                StatementKind::Write
            }
        }
        Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. } => StatementKind::Read,

        // EXPLAIN ANALYZE runs the statement, and plain EXPLAIN of a write
        // is still treated as the write it describes.
        Statement::Explain { statement, .. } => classify_statement(statement),

        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateTrigger { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateVirtualTable { .. }
        | Statement::CreateExtension { .. }
        | Statement::CreatePolicy { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterSchema { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. }
        | Statement::AlterType { .. }
        | Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::DropPolicy { .. }
        | Statement::Truncate { .. }
        | Statement::Comment { .. } => StatementKind::Ddl,

        // DML, transaction control, procedure calls, session and
        // administrative statements, and anything unrecognized.
        _ => StatementKind::Write,
    }
}

/// A query is a pure read when neither its CTEs nor its body can modify
/// data and it takes no row locks.
fn is_pure_read(query: &Query) -> bool {
    if !query.locks.is_empty() {
        return false;
    }
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| is_pure_read(&cte.query)) {
            return false;
        }
    }
    is_pure_read_body(&query.body)
}

fn is_pure_read_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_pure_read(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_pure_read_body(left) && is_pure_read_body(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

/// Functions that modify data, session or server state even when called
/// from a plain SELECT. Names are matched case-insensitively on the last
/// path segment, so `pg_catalog.set_config` matches `set_config`.
const SIDE_EFFECTING_FUNCTIONS: &[&str] = &[
    // PostgreSQL
    "set_config",
    "nextval",
    "setval",
    "setseed",
    "pg_notify",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_switch_wal",
    "pg_promote",
    "pg_create_restore_point",
    "pg_logical_emit_message",
    "pg_stat_reset",
    "pg_read_file",
    "pg_read_binary_file",
    "query_to_xml",
    "txid_current",
    "pg_current_xact_id",
    // MySQL
    "get_lock",
    "release_lock",
    "release_all_locks",
    "load_file",
    "sys_exec",
    "sys_eval",
    // SQLite
    "load_extension",
    "writefile",
    "fts3_tokenizer",
];

/// Prefixes of function families with the same property.
const SIDE_EFFECTING_PREFIXES: &[&str] = &[
    "pg_advisory",
    "pg_try_advisory",
    "pg_create_",
    "pg_drop_",
    "pg_replication_",
    "pg_stat_reset",
    "pg_file_",
    "lo_",
    "dblink",
];

fn is_side_effecting(name: &ObjectName) -> bool {
    let rendered = name.to_string();
    let last = rendered.rsplit('.').next().unwrap_or(&rendered);
    let last = last
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_ascii_lowercase();
    SIDE_EFFECTING_FUNCTIONS.contains(&last.as_str())
        || SIDE_EFFECTING_PREFIXES
            .iter()
            .any(|prefix| last.starts_with(prefix))
}

/// Scalar calls anywhere in the statement, plus table functions in FROM
/// (`SELECT * FROM dblink(...)`), which surface as relations.
fn calls_side_effecting_function(stmt: &Statement) -> bool {
    let scalar = visit_expressions(stmt, |expr| match expr {
        Expr::Function(func) if is_side_effecting(&func.name) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    });
    if scalar.is_break() {
        return true;
    }
    visit_relations(stmt, |relation| {
        if is_side_effecting(relation) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}
