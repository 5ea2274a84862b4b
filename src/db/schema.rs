//! Schema introspection module.
//!
//! This module provides database schema introspection functionality
//! for SQLite, PostgreSQL, and MySQL connections.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface:
//! `list_tables` and `describe_table` over one leased connection. Every
//! caller-supplied name is a bound argument, including SQLite's PRAGMA
//! table-valued functions.

use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, ConstraintInfo, IndexInfo, SchemaInfo, TableSchema, TableSummary, TableType,
};
use tracing::debug;

/// Split a `schema.table` target. Quoting is not interpreted; a target
/// with no dot names a table in the connection's default schema.
pub fn split_target(target: &str) -> (Option<&str>, &str) {
    match target.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (Some(schema), table),
        _ => (None, target),
    }
}

fn table_not_found(schema: Option<&str>, table: &str) -> DbError {
    match schema {
        Some(schema) => DbError::not_found("table", format!("{schema}.{table}")),
        None => DbError::not_found("table", table),
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                n.nspname::text AS table_schema,
                c.relname::text AS table_name,
                CASE c.relkind
                    WHEN 'v' THEN 'VIEW'
                    WHEN 'm' THEN 'MATERIALIZED VIEW'
                    ELSE 'BASE TABLE'
                END AS table_type,
                obj_description(c.oid, 'pg_class') AS comment
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p', 'v', 'm')
            AND n.nspname NOT IN ('pg_catalog', 'information_schema')
            AND n.nspname NOT LIKE 'pg_toast%'
            ORDER BY n.nspname, c.relname
            "#;

        pub const FIND_TABLE: &str = r#"
            SELECT
                n.nspname::text AS table_schema,
                obj_description(c.oid, 'pg_class') AS comment
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1
            AND n.nspname = COALESCE($2::text, current_schema())
            AND c.relkind IN ('r', 'p', 'v', 'm')
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                a.attname::text AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                NOT a.attnotnull AS nullable,
                pg_get_expr(d.adbin, d.adrelid) AS column_default,
                COALESCE(a.attnum = ANY(pk.conkey), false) AS is_primary_key,
                col_description(c.oid, a.attnum) AS column_comment
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            LEFT JOIN pg_constraint pk ON pk.conrelid = c.oid AND pk.contype = 'p'
            WHERE c.relname = $1
            AND n.nspname = $2
            AND a.attnum > 0
            AND NOT a.attisdropped
            ORDER BY a.attnum
            "#;

        pub const DESCRIBE_INDEXES: &str = r#"
            SELECT
                i.relname::text AS index_name,
                array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS column_names,
                ix.indisunique AS is_unique
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE t.relname = $1 AND n.nspname = $2
            GROUP BY i.relname, ix.indisunique
            ORDER BY i.relname
            "#;

        pub const DESCRIBE_CONSTRAINTS: &str = r#"
            SELECT
                con.conname::text AS name,
                con.contype::text AS contype,
                pg_get_constraintdef(con.oid) AS definition
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1 AND n.nspname = $2
            ORDER BY con.conname
            "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_SCHEMA USING utf8) AS TABLE_SCHEMA,
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE,
                CONVERT(TABLE_COMMENT USING utf8) AS TABLE_COMMENT
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#;

        pub const FIND_TABLE: &str = r#"
            SELECT
                CONVERT(TABLE_SCHEMA USING utf8) AS TABLE_SCHEMA,
                CONVERT(TABLE_COMMENT USING utf8) AS TABLE_COMMENT
            FROM information_schema.TABLES
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
                CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
                CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
                CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
                CONVERT(COLUMN_COMMENT USING utf8) AS COLUMN_COMMENT
            FROM information_schema.COLUMNS
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            ORDER BY ORDINAL_POSITION
            "#;

        pub const DESCRIBE_INDEXES: &str = r#"
            SELECT
                CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
                CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) AS COLUMN_NAMES,
                CAST(MIN(NON_UNIQUE) AS SIGNED) AS NON_UNIQUE
            FROM information_schema.STATISTICS
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            GROUP BY INDEX_NAME
            ORDER BY INDEX_NAME
            "#;

        pub const DESCRIBE_CONSTRAINTS: &str = r#"
            SELECT
                CONVERT(CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
                CONVERT(CONSTRAINT_TYPE USING utf8) AS CONSTRAINT_TYPE
            FROM information_schema.TABLE_CONSTRAINTS
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            ORDER BY CONSTRAINT_NAME
            "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT
                CONVERT(CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME,
                CONVERT(REFERENCED_COLUMN_NAME USING utf8) AS REFERENCED_COLUMN_NAME
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name, type FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const DESCRIBE_COLUMNS: &str =
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#;

        pub const DESCRIBE_INDEXES: &str =
            r#"SELECT name, "unique", origin FROM pragma_index_list(?) ORDER BY name"#;

        pub const INDEX_COLUMNS: &str = r#"SELECT name FROM pragma_index_info(?) ORDER BY seqno"#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT id, "table", "from", "to"
            FROM pragma_foreign_key_list(?)
            ORDER BY id, seq
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub mod postgres {
    use super::*;
    use crate::db::driver::postgres::map_error;
    use sqlx::{PgConnection, Row};

    pub async fn introspect(conn: &mut PgConnection, target: Option<&str>) -> DbResult<SchemaInfo> {
        match target {
            None => Ok(SchemaInfo::Tables {
                tables: list_tables(conn).await?,
            }),
            Some(target) => {
                let (schema, table) = split_target(target);
                Ok(SchemaInfo::Table(describe_table(conn, table, schema).await?))
            }
        }
    }

    pub async fn list_tables(conn: &mut PgConnection) -> DbResult<Vec<TableSummary>> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;

        let tables = rows
            .iter()
            .map(|row| {
                let name: String = row.get("table_name");
                let schema: String = row.get("table_schema");
                let type_str: String = row.get("table_type");
                TableSummary::new(name, TableType::parse(&type_str))
                    .with_schema(schema)
                    .with_comment(row.try_get("comment").ok().flatten())
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    pub async fn describe_table(
        conn: &mut PgConnection,
        table_name: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        let found = sqlx::query(queries::postgres::FIND_TABLE)
            .bind(table_name)
            .bind(schema)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_error)?
            .ok_or_else(|| table_not_found(schema, table_name))?;
        let schema_name: String = found.get("table_schema");

        let mut table = TableSchema::new(table_name).with_schema(Some(schema_name.clone()));
        table.comment = found
            .try_get::<Option<String>, _>("comment")
            .ok()
            .flatten()
            .filter(|c| !c.is_empty());

        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.columns = rows
            .iter()
            .map(|row| {
                ColumnDefinition::new(
                    row.get::<String, _>("column_name"),
                    row.get::<String, _>("data_type"),
                    row.get::<bool, _>("nullable"),
                )
                .with_default(row.try_get("column_default").ok().flatten())
                .primary_key(row.get("is_primary_key"))
                .with_comment(row.try_get("column_comment").ok().flatten())
            })
            .collect();
        table.derive_primary_key();

        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.indexes = rows
            .iter()
            .map(|row| IndexInfo {
                name: row.get("index_name"),
                columns: row.get("column_names"),
                unique: row.get("is_unique"),
            })
            .collect();

        let rows = sqlx::query(queries::postgres::DESCRIBE_CONSTRAINTS)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.constraints = rows
            .iter()
            .map(|row| {
                ConstraintInfo::new(
                    row.get::<String, _>("name"),
                    &row.get::<String, _>("contype"),
                    row.try_get("definition").ok().flatten(),
                )
            })
            .collect();

        Ok(table)
    }
}

pub mod mysql {
    use super::*;
    use crate::db::driver::mysql::map_error;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};
    use std::collections::BTreeMap;

    /// Safely get an optional string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    pub async fn introspect(
        conn: &mut MySqlConnection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        match target {
            None => Ok(SchemaInfo::Tables {
                tables: list_tables(conn).await?,
            }),
            Some(target) => {
                let (schema, table) = split_target(target);
                Ok(SchemaInfo::Table(describe_table(conn, table, schema).await?))
            }
        }
    }

    pub async fn list_tables(conn: &mut MySqlConnection) -> DbResult<Vec<TableSummary>> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;

        let tables = rows
            .iter()
            .filter_map(|row| {
                let name = get_string(row, "TABLE_NAME");
                if name.is_empty() {
                    return None;
                }
                let type_str = get_string(row, "TABLE_TYPE");
                Some(
                    TableSummary::new(name, TableType::parse(&type_str))
                        .with_schema(get_string(row, "TABLE_SCHEMA"))
                        .with_comment(get_optional_string(row, "TABLE_COMMENT")),
                )
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    pub async fn describe_table(
        conn: &mut MySqlConnection,
        table_name: &str,
        schema: Option<&str>,
    ) -> DbResult<TableSchema> {
        let found = sqlx::query(queries::mysql::FIND_TABLE)
            .bind(table_name)
            .bind(schema)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_error)?
            .ok_or_else(|| table_not_found(schema, table_name))?;
        let schema_name = get_string(&found, "TABLE_SCHEMA");

        let mut table = TableSchema::new(table_name).with_schema(Some(schema_name.clone()));
        table.comment = get_optional_string(&found, "TABLE_COMMENT").filter(|c| !c.is_empty());

        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.columns = rows
            .iter()
            .map(|row| {
                ColumnDefinition::new(
                    get_string(row, "COLUMN_NAME"),
                    get_string(row, "COLUMN_TYPE"),
                    get_string(row, "IS_NULLABLE") == "YES",
                )
                .with_default(get_optional_string(row, "COLUMN_DEFAULT"))
                .primary_key(get_string(row, "COLUMN_KEY") == "PRI")
                .with_comment(get_optional_string(row, "COLUMN_COMMENT"))
            })
            .collect();
        table.derive_primary_key();

        let rows = sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.indexes = rows
            .iter()
            .map(|row| IndexInfo {
                name: get_string(row, "INDEX_NAME"),
                columns: get_string(row, "COLUMN_NAMES")
                    .split(',')
                    .map(str::to_string)
                    .collect(),
                unique: row.try_get::<i64, _>("NON_UNIQUE").unwrap_or(1) == 0,
            })
            .collect();

        // Foreign key definitions, keyed by constraint name
        let rows = sqlx::query(queries::mysql::DESCRIBE_FOREIGN_KEYS)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        let mut references: BTreeMap<String, (Vec<String>, String, Vec<String>)> = BTreeMap::new();
        for row in &rows {
            let entry = references
                .entry(get_string(row, "CONSTRAINT_NAME"))
                .or_insert_with(|| (Vec::new(), get_string(row, "REFERENCED_TABLE_NAME"), Vec::new()));
            entry.0.push(get_string(row, "COLUMN_NAME"));
            entry.2.push(get_string(row, "REFERENCED_COLUMN_NAME"));
        }

        let rows = sqlx::query(queries::mysql::DESCRIBE_CONSTRAINTS)
            .bind(table_name)
            .bind(&schema_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        table.constraints = rows
            .iter()
            .map(|row| {
                let name = get_string(row, "CONSTRAINT_NAME");
                let definition = references.get(&name).map(|(from, target, to)| {
                    format!(
                        "FOREIGN KEY ({}) REFERENCES {}({})",
                        from.join(", "),
                        target,
                        to.join(", ")
                    )
                });
                ConstraintInfo::new(name, &get_string(row, "CONSTRAINT_TYPE"), definition)
            })
            .collect();

        Ok(table)
    }
}

pub mod sqlite {
    use super::*;
    use crate::db::driver::sqlite::map_error;
    use sqlx::{Row, SqliteConnection};

    pub async fn introspect(
        conn: &mut SqliteConnection,
        target: Option<&str>,
    ) -> DbResult<SchemaInfo> {
        match target {
            None => Ok(SchemaInfo::Tables {
                tables: list_tables(conn).await?,
            }),
            // SQLite has a single schema per file; a `main.` prefix is accepted
            Some(target) => {
                let (schema, table) = split_target(target);
                match schema {
                    Some(s) if !s.eq_ignore_ascii_case("main") => Err(table_not_found(schema, table)),
                    _ => Ok(SchemaInfo::Table(describe_table(conn, table).await?)),
                }
            }
        }
    }

    pub async fn list_tables(conn: &mut SqliteConnection) -> DbResult<Vec<TableSummary>> {
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;

        let tables = rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let type_str: String = row.get("type");
                TableSummary::new(name, TableType::parse(&type_str))
            })
            .collect::<Vec<_>>();

        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    pub async fn describe_table(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> DbResult<TableSchema> {
        let rows = sqlx::query(queries::sqlite::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        if rows.is_empty() {
            return Err(table_not_found(None, table_name));
        }

        let mut table = TableSchema::new(table_name);
        table.columns = rows
            .iter()
            .map(|row| {
                let notnull: i64 = row.get("notnull");
                let pk: i64 = row.get("pk");
                ColumnDefinition::new(
                    row.get::<String, _>("name"),
                    row.get::<String, _>("type"),
                    notnull == 0,
                )
                .with_default(row.try_get("dflt_value").ok().flatten())
                .primary_key(pk > 0)
            })
            .collect();
        table.derive_primary_key();

        let index_rows = sqlx::query(queries::sqlite::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        for idx_row in &index_rows {
            let name: String = idx_row.get("name");
            let unique: i64 = idx_row.get("unique");
            let origin: String = idx_row.try_get("origin").unwrap_or_default();

            let columns = sqlx::query(queries::sqlite::INDEX_COLUMNS)
                .bind(&name)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_error)?
                .iter()
                .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
                .collect::<Vec<_>>();

            if origin == "u" {
                table.constraints.push(ConstraintInfo::new(
                    name.clone(),
                    "UNIQUE",
                    Some(format!("UNIQUE ({})", columns.join(", "))),
                ));
            }
            table.indexes.push(IndexInfo {
                name,
                columns,
                unique: unique != 0,
            });
        }

        if !table.primary_key.is_empty() {
            let definition = format!("PRIMARY KEY ({})", table.primary_key.join(", "));
            table.constraints.insert(
                0,
                ConstraintInfo::new(format!("{table_name}_pkey"), "PRIMARY KEY", Some(definition)),
            );
        }

        let fk_rows = sqlx::query(queries::sqlite::DESCRIBE_FOREIGN_KEYS)
            .bind(table_name)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?;
        let mut current: Option<(i64, String, Vec<String>, Vec<String>)> = None;
        let mut foreign_keys = Vec::new();
        for row in &fk_rows {
            let id: i64 = row.get("id");
            let target: String = row.get("table");
            let from: String = row.get("from");
            let to: Option<String> = row.try_get("to").ok().flatten();
            match current.as_mut() {
                Some(fk) if fk.0 == id => {
                    fk.2.push(from);
                    fk.3.extend(to);
                }
                _ => {
                    foreign_keys.extend(current.take());
                    current = Some((id, target, vec![from], to.into_iter().collect()));
                }
            }
        }
        foreign_keys.extend(current);
        for (id, target, from, to) in foreign_keys {
            let references = if to.is_empty() {
                target
            } else {
                format!("{target}({})", to.join(", "))
            };
            table.constraints.push(ConstraintInfo::new(
                format!("{table_name}_fk_{id}"),
                "FOREIGN KEY",
                Some(format!("FOREIGN KEY ({}) REFERENCES {references}", from.join(", "))),
            ));
        }

        Ok(table)
    }
}
