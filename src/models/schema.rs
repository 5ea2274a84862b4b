//! Schema-related data models.
//!
//! This module defines the backend-neutral shapes returned by schema
//! introspection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result of `describe_schema`: either the table list or one table's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaInfo {
    Tables { tables: Vec<TableSummary> },
    Table(TableSchema),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table_type: TableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableSummary {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table_type,
            comment: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Empty comments are dropped.
    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment.filter(|c| !c.is_empty());
        self
    }
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
    MaterializedView,
    SystemTable,
    TemporaryTable,
}

impl TableType {
    /// Parse table type from database-specific string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "table" | "base table" => Self::Table,
            "view" | "system view" => Self::View,
            "materialized view" | "matview" => Self::MaterializedView,
            "system table" => Self::SystemTable,
            "local temporary" | "temporary" | "temp" => Self::TemporaryTable,
            _ => Self::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableSchema {
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexInfo>,
    pub constraints: Vec<ConstraintInfo>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: None,
            comment: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema_name = schema;
        self
    }

    /// Fill `primary_key` from the columns flagged as key members, in column order.
    pub fn derive_primary_key(&mut self) {
        self.primary_key = self
            .columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDefinition {
    pub name: String,
    /// Backend type as declared, e.g. "character varying(64)" or "INTEGER"
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
            comment: None,
        }
    }

    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value;
        self
    }

    pub fn primary_key(mut self, is_primary_key: bool) -> Self {
        self.is_primary_key = is_primary_key;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment.filter(|c| !c.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConstraintInfo {
    pub name: String,
    /// "primary_key", "foreign_key", "unique", "check" or "exclusion"
    pub constraint_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl ConstraintInfo {
    /// Build from a PostgreSQL `pg_constraint.contype` letter or a
    /// `TABLE_CONSTRAINTS.CONSTRAINT_TYPE` name.
    pub fn new(name: impl Into<String>, raw_type: &str, definition: Option<String>) -> Self {
        let constraint_type = match raw_type.to_ascii_uppercase().as_str() {
            "P" | "PRIMARY KEY" => "primary_key",
            "F" | "FOREIGN KEY" => "foreign_key",
            "U" | "UNIQUE" => "unique",
            "C" | "CHECK" => "check",
            "X" => "exclusion",
            _ => "other",
        };
        Self {
            name: name.into(),
            constraint_type: constraint_type.to_string(),
            definition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_type_parse() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("view"), TableType::View);
        assert_eq!(TableType::parse("whatever"), TableType::Table);
    }

    #[test]
    fn test_constraint_type_mapping() {
        assert_eq!(ConstraintInfo::new("pk", "p", None).constraint_type, "primary_key");
        assert_eq!(ConstraintInfo::new("fk", "FOREIGN KEY", None).constraint_type, "foreign_key");
        assert_eq!(ConstraintInfo::new("t", "t", None).constraint_type, "other");
    }

    #[test]
    fn test_derive_primary_key_keeps_column_order() {
        let mut table = TableSchema::new("t");
        table.columns = vec![
            ColumnDefinition::new("a", "INTEGER", false).primary_key(true),
            ColumnDefinition::new("b", "TEXT", true),
            ColumnDefinition::new("c", "INTEGER", false).primary_key(true),
        ];
        table.derive_primary_key();
        assert_eq!(table.primary_key, vec!["a", "c"]);
    }

    #[test]
    fn test_schema_info_serialization_is_tagged() {
        let info = SchemaInfo::Tables {
            tables: vec![TableSummary::new("users", TableType::Table).with_comment(Some(String::new()))],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "tables");
        assert_eq!(json["tables"][0]["name"], "users");
        assert!(json["tables"][0].get("comment").is_none());
    }
}
