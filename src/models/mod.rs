//! Data models shared across the core.
//!
//! This module re-exports all model types used throughout the application.

pub mod descriptor;
pub mod query;
pub mod schema;

pub use descriptor::{
    AccessMode, BackendKind, ConnectionTarget, Credential, DatabaseDescriptor, PoolLimits, Secret,
    mask_url, validate_alias,
};
pub use query::{
    ColumnType, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryParam, QueryParams, QueryRequest,
    QueryResult, Value,
};
pub use schema::{
    ColumnDefinition, ConstraintInfo, IndexInfo, SchemaInfo, TableSchema, TableSummary, TableType,
};
