//! Query-related data models.
//!
//! This module defines query requests, their parameters, and the canonical
//! value and result shapes every backend is normalized into.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default row limit for query results.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// A parameter value for parameterized queries.
///
/// Binary values are passed as `{"base64": "..."}` so they cannot be
/// confused with text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    Bytes {
        #[serde(with = "base64_bytes")]
        #[schemars(with = "String")]
        base64: Vec<u8>,
    },
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes { .. } => "bytes",
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Statement parameters, either by position or by `:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParams {
    Positional(Vec<QueryParam>),
    Named(BTreeMap<String, QueryParam>),
}

impl Default for QueryParams {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Positional(values) => values.is_empty(),
            Self::Named(values) => values.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }
}

impl From<Vec<QueryParam>> for QueryParams {
    fn from(values: Vec<QueryParam>) -> Self {
        Self::Positional(values)
    }
}

/// One statement to run against one alias.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub alias: String,
    pub sql: String,
    pub params: QueryParams,
    /// Requested statement timeout, capped by the alias ceiling
    pub timeout: Option<Duration>,
    /// Default: 100, max: 10000
    pub limit: Option<u32>,
}

impl QueryRequest {
    pub fn new(alias: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            sql: sql.into(),
            params: QueryParams::default(),
            timeout: None,
            limit: None,
        }
    }

    pub fn with_params(mut self, params: impl Into<QueryParams>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Get the effective row limit (with bounds checking).
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .map(|l| l.clamp(1, MAX_ROW_LIMIT))
            .unwrap_or(DEFAULT_ROW_LIMIT)
    }
}

/// The canonical value set every backend value is mapped into.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON rendering: bytes become base64, timestamps RFC 3339 and
    /// non-finite floats the strings "NaN", "Infinity" and "-Infinity".
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(non_finite_name(*f).to_string())),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Bytes(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
            Self::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Canonical column type reported next to each column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    Bytes,
    Timestamp,
    /// No declared type (SQLite expressions, NULL literals)
    Unknown,
}

/// A successful statement result in canonical form.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub column_types: Vec<ColumnType>,
    #[schemars(with = "Vec<Vec<serde_json::Value>>")]
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.rows_affected.is_none()
    }

    /// Rows rendered as JSON arrays, for transports.
    pub fn json_rows(&self) -> Vec<Vec<serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Value::to_json).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
    }

    #[test]
    fn test_params_deserialize_positional_and_named() {
        let positional: QueryParams = serde_json::from_str(r#"[1, "a", null, true]"#).unwrap();
        assert_eq!(
            positional,
            QueryParams::Positional(vec![
                QueryParam::Int(1),
                QueryParam::String("a".into()),
                QueryParam::Null,
                QueryParam::Bool(true),
            ])
        );

        let named: QueryParams = serde_json::from_str(r#"{"id": 7, "blob": {"base64": "AQI="}}"#).unwrap();
        let QueryParams::Named(map) = named else {
            panic!("expected named params");
        };
        assert_eq!(map["id"], QueryParam::Int(7));
        assert_eq!(map["blob"], QueryParam::Bytes { base64: vec![1, 2] });
    }

    #[test]
    fn test_query_request_limits() {
        let req = QueryRequest::new("a", "SELECT 1");
        assert_eq!(req.effective_limit(), DEFAULT_ROW_LIMIT);
        assert_eq!(req.clone().with_limit(99999).effective_limit(), MAX_ROW_LIMIT);
        assert_eq!(req.with_limit(0).effective_limit(), 1);
    }

    #[test]
    fn test_value_json_forms() {
        assert_eq!(Value::Integer(1).to_json(), serde_json::json!(1));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Bytes(vec![0xff]).to_json(), serde_json::json!("/w=="));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::json!("NaN"));
        assert_eq!(
            Value::Float(f64::NEG_INFINITY).to_json(),
            serde_json::json!("-Infinity")
        );
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Value::Timestamp(ts).to_json(),
            serde_json::json!("2024-05-01T12:30:00Z")
        );
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
