//! MCP service implementation using rmcp.
//!
//! `DbService` exposes the dispatcher's three operations as MCP tools.
//! Failures are returned as protocol errors whose `data` carries the
//! classified error kind and whether a retry is safe.

use crate::dispatcher::{DatabaseSummary, Dispatcher};
use crate::models::{QueryParams, QueryRequest, QueryResult, SchemaInfo};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListDatabasesOutput {
    pub databases: Vec<DatabaseSummary>,
    pub count: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DescribeSchemaInput {
    /// Database alias from list_databases
    pub alias: String,
    /// Table to describe, optionally schema-qualified ("sales.orders").
    /// Omit to list tables and views.
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DescribeSchemaOutput {
    pub alias: String,
    pub schema: SchemaInfo,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// Database alias from list_databases
    pub alias: String,
    /// A single SQL statement
    pub sql: String,
    /// Positional values (array) or named values (object) for `:name` placeholders
    #[serde(default)]
    pub params: Option<QueryParams>,
    /// Statement timeout in milliseconds (at least 1), capped by the database's limit
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Maximum rows to return (default: 100, max: 10000)
    #[serde(default)]
    pub limit: Option<u32>,
}

impl From<ExecuteQueryInput> for QueryRequest {
    fn from(input: ExecuteQueryInput) -> Self {
        let mut request = QueryRequest::new(input.alias, input.sql);
        if let Some(params) = input.params {
            request = request.with_params(params);
        }
        if let Some(ms) = input.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }
        if let Some(limit) = input.limit {
            request = request.with_limit(limit);
        }
        request
    }
}

impl ExecuteQueryInput {
    fn validate(&self) -> Result<(), McpError> {
        if self.timeout_ms == Some(0) {
            return Err(McpError::invalid_params(
                "timeout_ms must be greater than 0; omit it to use the database's limit",
                None,
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct DbService {
    dispatcher: Dispatcher,
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn require_alias(alias: &str) -> Result<String, McpError> {
        let trimmed = alias.trim();
        if trimmed.is_empty() {
            Err(McpError::invalid_params(
                "alias is required. Call list_databases first to get available aliases.",
                None,
            ))
        } else {
            Ok(trimmed.to_string())
        }
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "List the configured databases.\nReturns each alias with its backend kind (postgres/mysql/sqlite), access mode, and description."
    )]
    async fn list_databases(&self) -> Json<ListDatabasesOutput> {
        let databases = self.dispatcher.list_databases();
        let count = databases.len();
        Json(ListDatabasesOutput { databases, count })
    }

    #[tool(
        description = "Describe a database schema.\nWithout `table`, lists tables and views. With `table`, returns its columns, primary key, indexes, and constraints."
    )]
    async fn describe_schema(
        &self,
        Parameters(input): Parameters<DescribeSchemaInput>,
    ) -> Result<Json<DescribeSchemaOutput>, McpError> {
        let alias = Self::require_alias(&input.alias)?;
        let schema = self
            .dispatcher
            .describe_schema(&alias, input.table.as_deref())
            .await?;
        Ok(Json(DescribeSchemaOutput { alias, schema }))
    }

    #[tool(
        description = "Execute one SQL statement with bound parameters.\nRead-only databases reject anything but queries. Results are capped by `limit` and `truncated` is set when rows were dropped.\nValues: integers, floats, text, booleans, base64 bytes, RFC 3339 timestamps."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        let mut input = input;
        input.alias = Self::require_alias(&input.alias)?;
        input.validate()?;
        let request = QueryRequest::from(input);
        Ok(Json(self.dispatcher.execute_query(&request).await?))
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: Some("Unified Database Access".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Unified access to the configured SQL databases.\n\
                \n\
                ## Workflow\n\
                1. Call `list_databases` to get the available aliases\n\
                2. Call `describe_schema` with an alias to find tables, then with `table` for columns\n\
                3. Call `execute_query` with the alias, one SQL statement and bound `params`\n\
                \n\
                ## Notes\n\
                - Read-only databases reject INSERT/UPDATE/DELETE and DDL with `access_denied`\n\
                - Never inline values into SQL; pass them in `params`\n\
                - Errors carry `kind` and `retryable` in their data; retry only when `retryable` is true"
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessMode, DatabaseDescriptor, QueryParam};
    use crate::registry::Registry;
    use tempfile::TempDir;

    fn create_test_service(dir: &TempDir) -> DbService {
        let desc = DatabaseDescriptor::sqlite("local", dir.path().join("t.db"), AccessMode::ReadWrite);
        DbService::new(Dispatcher::new(Registry::from_descriptors(vec![desc]).unwrap()))
    }

    #[test]
    fn test_require_alias() {
        assert_eq!(DbService::require_alias("  mydb ").unwrap(), "mydb");
        let err = DbService::require_alias("   ").unwrap_err();
        assert!(err.to_string().contains("alias is required"));
    }

    #[test]
    fn test_execute_input_into_request() {
        let input: ExecuteQueryInput = serde_json::from_value(serde_json::json!({
            "alias": "local",
            "sql": "SELECT * FROM t WHERE id = :id",
            "params": {"id": 7},
            "timeout_ms": 50,
            "limit": 5
        }))
        .unwrap();
        let request = QueryRequest::from(input);
        assert_eq!(request.timeout, Some(Duration::from_millis(50)));
        assert_eq!(request.effective_limit(), 5);
        let QueryParams::Named(named) = request.params else {
            panic!("expected named params");
        };
        assert_eq!(named["id"], QueryParam::Int(7));
    }

    #[tokio::test]
    async fn test_server_info() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service(&dir);
        let info = service.get_info();
        assert_eq!(info.server_info.name, env!("CARGO_PKG_NAME"));
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_tools_round_trip() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service(&dir);

        let Json(listed) = service.list_databases().await;
        assert_eq!(listed.count, 1);

        let create = ExecuteQueryInput {
            alias: "local".into(),
            sql: "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)".into(),
            params: None,
            timeout_ms: None,
            limit: None,
        };
        service.execute_query(Parameters(create)).await.unwrap();

        let described = service
            .describe_schema(Parameters(DescribeSchemaInput {
                alias: "local".into(),
                table: Some("t".into()),
            }))
            .await
            .unwrap();
        assert!(matches!(described.0.schema, SchemaInfo::Table(_)));
    }

    #[tokio::test]
    async fn test_unknown_alias_maps_to_error_data() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service(&dir);
        let err = service
            .describe_schema(Parameters(DescribeSchemaInput {
                alias: "missing".into(),
                table: None,
            }))
            .await
            .err().unwrap();
        let data = err.data.unwrap();
        assert_eq!(data["kind"], "not_found");
        assert_eq!(data["retryable"], false);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_rejected_before_execution() {
        let dir = TempDir::new().unwrap();
        let service = create_test_service(&dir);
        let err = service
            .execute_query(Parameters(ExecuteQueryInput {
                alias: "local".into(),
                sql: "SELECT 1".into(),
                params: None,
                timeout_ms: Some(0),
                limit: None,
            }))
            .await
            .err().unwrap();
        assert_eq!(err.code.0, -32602);
        assert!(err.message.contains("timeout_ms"));
        assert_eq!(service.dispatcher().pools().pool_count().await, 0);

        let ok = service
            .execute_query(Parameters(ExecuteQueryInput {
                alias: "local".into(),
                sql: "SELECT 1".into(),
                params: None,
                timeout_ms: Some(1000),
                limit: None,
            }))
            .await
            .unwrap();
        assert_eq!(ok.0.row_count, 1);
    }
}
