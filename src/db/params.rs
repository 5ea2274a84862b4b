//! Parameter binding.
//!
//! Values are only ever passed to the driver as bound arguments. Named
//! `:name` placeholders are rewritten, by token position, into the
//! backend's positional syntax; literal text, quoted identifiers and
//! comments are left untouched because they are single tokens.

use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryParams};
use sqlparser::dialect::Dialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::BTreeSet;

/// Positional placeholder syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Dollar,
    /// `?`
    Question,
}

/// Statement text plus its positional values, ready to hand to a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

impl BoundStatement {
    pub fn unbound(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Vec::new(),
        }
    }
}

/// Turn `sql` and `params` into a positional statement for one backend.
pub fn bind_statement(
    sql: &str,
    params: &QueryParams,
    dialect: &dyn Dialect,
    style: PlaceholderStyle,
) -> DbResult<BoundStatement> {
    match params {
        QueryParams::Positional(values) => Ok(BoundStatement {
            sql: sql.to_string(),
            values: values.clone(),
        }),
        QueryParams::Named(values) => {
            let placeholders = named_placeholders(sql, dialect)?;
            if placeholders.is_empty() && !values.is_empty() {
                return Err(DbError::execution(
                    "named parameters were supplied but the statement has no :name placeholders",
                    None,
                ));
            }

            let mut rewritten = String::with_capacity(sql.len());
            let mut bound = Vec::with_capacity(placeholders.len());
            let mut used = BTreeSet::new();
            let mut cursor = 0;
            for placeholder in &placeholders {
                let value = values.get(&placeholder.name).ok_or_else(|| {
                    DbError::execution(
                        format!("missing value for parameter :{}", placeholder.name),
                        None,
                    )
                })?;
                rewritten.push_str(&sql[cursor..placeholder.start]);
                match style {
                    PlaceholderStyle::Dollar => {
                        rewritten.push('$');
                        rewritten.push_str(&(bound.len() + 1).to_string());
                    }
                    PlaceholderStyle::Question => rewritten.push('?'),
                }
                bound.push(value.clone());
                used.insert(placeholder.name.as_str());
                cursor = placeholder.end;
            }
            rewritten.push_str(&sql[cursor..]);

            if let Some(unused) = values.keys().find(|k| !used.contains(k.as_str())) {
                return Err(DbError::execution(
                    format!("parameter :{unused} is not used by the statement"),
                    None,
                ));
            }

            Ok(BoundStatement {
                sql: rewritten,
                values: bound,
            })
        }
    }
}

#[derive(Debug)]
struct NamedPlaceholder {
    name: String,
    /// Byte range of `:name` in the original text
    start: usize,
    end: usize,
}

/// Find every `:name` placeholder: a colon immediately followed by an
/// unquoted word.
fn named_placeholders(sql: &str, dialect: &dyn Dialect) -> DbResult<Vec<NamedPlaceholder>> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize_with_location()
        .map_err(|e| DbError::execution(format!("cannot tokenize statement: {e}"), None))?;

    let mut found = Vec::new();
    for pair in tokens.windows(2) {
        let (colon, word) = (&pair[0], &pair[1]);
        let Token::Colon = colon.token else {
            continue;
        };
        let Token::Word(w) = &word.token else {
            continue;
        };
        if w.quote_style.is_some() || colon.span.end != word.span.start {
            continue;
        }
        let (Some(start), Some(end)) = (
            byte_offset(sql, colon.span.start),
            byte_offset(sql, word.span.end),
        ) else {
            continue;
        };
        found.push(NamedPlaceholder {
            name: w.value.clone(),
            start,
            end,
        });
    }
    Ok(found)
}

/// Map a 1-based line/column (in characters) onto a byte offset.
fn byte_offset(sql: &str, loc: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (idx, ch) in sql.char_indices() {
        if line == loc.line && column == loc.column {
            return Some(idx);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == loc.line && column == loc.column).then_some(sql.len())
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes { base64 } => query.bind(base64.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes { base64 } => query.bind(base64.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes { base64 } => query.bind(base64.as_slice()),
    }
}
