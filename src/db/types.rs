//! Backend type mappings.
//!
//! This module maps backend-native column types and values onto the
//! canonical [`Value`] set.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! Types without a canonical counterpart are stringified:
//!
//! | backend type            | canonical form                      |
//! |-------------------------|-------------------------------------|
//! | DECIMAL / NUMERIC       | exact decimal text, e.g. `"12.50"`  |
//! | UUID                    | hyphenated lowercase text           |
//! | JSON / JSONB            | compact JSON text                   |
//! | DATE                    | `YYYY-MM-DD`                        |
//! | TIME                    | `HH:MM:SS[.fraction]`               |
//! | TIMESTAMP (no zone)     | timestamp, interpreted as UTC       |
//! | anything else           | the backend's text form, else bytes |

use crate::db::normalize::RawColumn;
use crate::models::{BackendKind, ColumnType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

impl TypeCategory {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Integer => ColumnType::Integer,
            Self::Float => ColumnType::Float,
            Self::Boolean => ColumnType::Boolean,
            Self::Binary => ColumnType::Bytes,
            Self::Timestamp | Self::TimestampTz => ColumnType::Timestamp,
            Self::Decimal | Self::Text | Self::Json | Self::Uuid | Self::Date | Self::Time => {
                ColumnType::Text
            }
            Self::Unknown => ColumnType::Unknown,
        }
    }
}

/// Classify a backend type name into a logical category.
pub fn categorize_type(type_name: &str, kind: BackendKind) -> TypeCategory {
    let lower = type_name.to_ascii_lowercase();
    let base = lower.split('(').next().unwrap_or_default().trim();
    let base = base.trim_end_matches(" unsigned");

    match base {
        // SQLite's NUMERIC affinity holds integers or floats, never exact decimals
        "decimal" | "numeric" if kind == BackendKind::Sqlite => TypeCategory::Float,
        "decimal" | "numeric" => TypeCategory::Decimal,
        "bool" | "boolean" => TypeCategory::Boolean,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "smallserial" | "serial" | "bigserial" | "year" => TypeCategory::Integer,
        "float" | "float4" | "float8" | "real" | "double" | "double precision" => {
            TypeCategory::Float
        }
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            TypeCategory::Binary
        }
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        // MySQL TIMESTAMP is stored in UTC, DATETIME is zone-less
        "timestamp" if kind == BackendKind::MySql => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" | "datetime" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "timetz" | "time without time zone" => TypeCategory::Time,
        "text" | "varchar" | "char" | "character" | "character varying" | "bpchar" | "name"
        | "citext" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set" | "clob" => {
            TypeCategory::Text
        }
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value kept as its exact decimal text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("numeric")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digits) as decimal text.
fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let read_i16 = |at: usize| -> Result<i16, sqlx::error::BoxDynError> {
        bytes
            .get(at..at + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };
    let ndigits = read_i16(0)? as usize;
    let weight = read_i16(2)? as i32;
    let sign = read_i16(4)? as u16;
    let dscale = read_i16(6)? as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_i16(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;

    let mut integer_part = String::new();
    for pos in 0..=weight.max(-1) {
        let digit = digits.get(pos as usize).copied().unwrap_or(0);
        if integer_part.is_empty() {
            if digit != 0 {
                integer_part.push_str(&digit.to_string());
            }
        } else {
            integer_part.push_str(&format!("{digit:04}"));
        }
    }
    if integer_part.is_empty() {
        integer_part.push('0');
    }

    let mut fraction = String::new();
    if dscale > 0 {
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            let digit = if pos < 0 {
                0
            } else {
                digits.get(pos as usize).copied().unwrap_or(0)
            };
            fraction.push_str(&format!("{digit:04}"));
            pos += 1;
        }
        fraction.truncate(dscale);
    }

    let mut out = String::new();
    if sign == 0x4000 && (integer_part != "0" || fraction.chars().any(|c| c != '0')) {
        out.push('-');
    }
    out.push_str(&integer_part);
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Decoding of one backend row into canonical values.
pub trait RowToValues {
    fn raw_columns(&self) -> Vec<RawColumn>;
    fn to_values(&self) -> Vec<Value>;
}

/// Describe sqlx columns for a backend.
pub fn describe_columns<C: Column>(columns: &[C], kind: BackendKind) -> Vec<RawColumn> {
    columns
        .iter()
        .map(|col| {
            let type_name = col.type_info().name().to_string();
            let column_type = categorize_type(&type_name, kind).column_type();
            RawColumn {
                name: col.name().to_string(),
                type_name,
                column_type,
            }
        })
        .collect()
}

impl RowToValues for MySqlRow {
    fn raw_columns(&self) -> Vec<RawColumn> {
        describe_columns(self.columns(), BackendKind::MySql)
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), BackendKind::MySql);
                mysql::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for PgRow {
    fn raw_columns(&self) -> Vec<RawColumn> {
        describe_columns(self.columns(), BackendKind::Postgres)
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), BackendKind::Postgres);
                postgres::decode_column(self, idx, category)
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn raw_columns(&self) -> Vec<RawColumn> {
        describe_columns(self.columns(), BackendKind::Sqlite)
    }

    fn to_values(&self) -> Vec<Value> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = categorize_type(col.type_info().name(), BackendKind::Sqlite);
                sqlite::decode_column(self, idx, declared)
            })
            .collect()
    }
}

fn is_null<'r, R: Row>(row: &'r R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true)
}

fn naive_to_utc(ts: NaiveDateTime) -> Value {
    Value::Timestamp(ts.and_utc())
}

fn date_text(date: NaiveDate) -> Value {
    Value::Text(date.format("%Y-%m-%d").to_string())
}

fn time_text(time: NaiveTime) -> Value {
    Value::Text(time.to_string())
}

/// UTF-8 bytes become text, anything else stays binary.
fn bytes_or_text(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn undecodable(backend: &str, idx: usize, category: TypeCategory) -> Value {
    tracing::warn!(backend, column = idx, ?category, "Failed to decode column value");
    Value::Null
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        if is_null(row, idx) {
            return Value::Null;
        }
        let decoded = match category {
            TypeCategory::Decimal => row.try_get::<RawDecimal, _>(idx).ok().map(|d| Value::Text(d.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(Value::Boolean),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(Value::Float),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| Value::Text(v.to_string())),
            TypeCategory::TimestampTz => row
                .try_get::<DateTime<Utc>, _>(idx)
                .ok()
                .map(Value::Timestamp),
            TypeCategory::Timestamp => row.try_get::<NaiveDateTime, _>(idx).ok().map(naive_to_utc),
            TypeCategory::Date => row.try_get::<NaiveDate, _>(idx).ok().map(date_text),
            TypeCategory::Time => row.try_get::<NaiveTime, _>(idx).ok().map(time_text),
            TypeCategory::Text | TypeCategory::Uuid | TypeCategory::Unknown => None,
        };
        decoded
            .or_else(|| decode_text(row, idx))
            .unwrap_or_else(|| undecodable("mysql", idx, category))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(Value::Integer(v));
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Some(Value::Integer(v.into()));
        }
        // BIGINT UNSIGNED above i64::MAX keeps its exact digits as text
        row.try_get::<u64, _>(idx).ok().map(|v| match i64::try_from(v) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Text(v.to_string()),
        })
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<String, _>(idx)
            .ok()
            .map(Value::Text)
            .or_else(|| row.try_get_unchecked::<Vec<u8>, _>(idx).ok().map(bytes_or_text))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        if is_null(row, idx) {
            return Value::Null;
        }
        let decoded = match category {
            TypeCategory::Decimal => row.try_get::<RawDecimal, _>(idx).ok().map(|d| Value::Text(d.0)),
            TypeCategory::Integer => row
                .try_get::<i64, _>(idx)
                .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
                .or_else(|_| row.try_get::<i16, _>(idx).map(i64::from))
                .ok()
                .map(Value::Integer),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(Value::Boolean),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(Value::Float),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| Value::Text(v.to_string())),
            TypeCategory::Uuid => row
                .try_get::<uuid::Uuid, _>(idx)
                .ok()
                .map(|u| Value::Text(u.hyphenated().to_string())),
            TypeCategory::TimestampTz => row
                .try_get::<DateTime<Utc>, _>(idx)
                .ok()
                .map(Value::Timestamp),
            TypeCategory::Timestamp => row.try_get::<NaiveDateTime, _>(idx).ok().map(naive_to_utc),
            TypeCategory::Date => row.try_get::<NaiveDate, _>(idx).ok().map(date_text),
            TypeCategory::Time => row.try_get::<NaiveTime, _>(idx).ok().map(time_text),
            TypeCategory::Text | TypeCategory::Unknown => None,
        };
        decoded
            .or_else(|| decode_text(row, idx))
            .unwrap_or_else(|| undecodable("postgres", idx, category))
    }

    /// Text-like types (including enums and domains) share the UTF-8 wire form.
    fn decode_text(row: &PgRow, idx: usize) -> Option<Value> {
        row.try_get::<String, _>(idx)
            .ok()
            .map(Value::Text)
            .or_else(|| row.try_get_unchecked::<Vec<u8>, _>(idx).ok().map(bytes_or_text))
    }
}

mod sqlite {
    use super::*;

    /// SQLite values are typed per value, so decoding follows the runtime
    /// storage class; the declared type only marks booleans.
    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> Value {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return undecodable("sqlite", idx, declared),
        };
        let decoded = match storage.as_str() {
            "INTEGER" if declared == TypeCategory::Boolean => {
                row.try_get::<bool, _>(idx).ok().map(Value::Boolean)
            }
            "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(idx).ok().map(Value::Integer),
            "REAL" => row.try_get::<f64, _>(idx).ok().map(Value::Float),
            "BLOB" => row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes),
            _ => row.try_get_unchecked::<String, _>(idx).ok().map(Value::Text),
        };
        decoded.unwrap_or_else(|| undecodable("sqlite", idx, declared))
    }
}
