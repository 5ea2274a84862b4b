//! Result normalization.
//!
//! Drivers hand back a [`RawResult`]; this module turns it into the
//! canonical [`QueryResult`] every caller sees.

use crate::models::{ColumnType, QueryResult, Value};
use std::collections::HashSet;
use std::time::Duration;

/// A column as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub type_name: String,
    pub column_type: ColumnType,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            type_name: String::new(),
            column_type,
        }
    }
}

/// Driver-level result before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    pub columns: Vec<RawColumn>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: Option<u64>,
    pub truncated: bool,
}

impl RawResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected: Some(rows_affected),
            ..Default::default()
        }
    }
}

/// Normalize a raw result.
///
/// Duplicate column names get `_2`, `_3`, ... suffixes that never collide
/// with another column, every row is padded or cut to the column count,
/// and columns the backend could not type take the type of their first
/// non-null value.
pub fn normalize(raw: RawResult, elapsed: Duration) -> QueryResult {
    let columns = dedup_column_names(raw.columns.iter().map(|c| c.name.as_str()));
    let width = columns.len();

    let rows: Vec<Vec<Value>> = raw
        .rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, Value::Null);
            row
        })
        .collect();

    let column_types = raw
        .columns
        .iter()
        .enumerate()
        .map(|(idx, col)| match col.column_type {
            ColumnType::Unknown => infer_column_type(&rows, idx),
            known => known,
        })
        .collect();

    QueryResult {
        columns,
        column_types,
        row_count: rows.len(),
        rows,
        rows_affected: raw.rows_affected,
        truncated: raw.truncated,
        execution_time_ms: elapsed.as_millis() as u64,
    }
}

fn dedup_column_names<'a>(names: impl Iterator<Item = &'a str> + Clone) -> Vec<String> {
    let mut taken: HashSet<String> = names.clone().map(str::to_string).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for name in names {
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
            continue;
        }
        let mut n = 2;
        let unique = loop {
            let candidate = format!("{name}_{n}");
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        taken.insert(unique.clone());
        out.push(unique);
    }
    out
}

fn infer_column_type(rows: &[Vec<Value>], idx: usize) -> ColumnType {
    rows.iter()
        .filter_map(|row| row.get(idx))
        .find(|v| !matches!(v, Value::Null))
        .map(|v| match v {
            Value::Integer(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Bytes(_) => ColumnType::Bytes,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Null => ColumnType::Unknown,
        })
        .unwrap_or(ColumnType::Unknown)
}
