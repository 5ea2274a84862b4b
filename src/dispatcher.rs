//! Request dispatcher.
//!
//! Maps the named operations onto registry, pool manager and executor.
//! It only sequences calls and propagates the first failure; the only
//! state it holds are handles to the shared registry and pools.

use crate::config::ConfigDocument;
use crate::db::executor::{QueryError, QueryExecutor};
use crate::db::pool::ConnectionManager;
use crate::error::DbResult;
use crate::impl_db_dispatch;
use crate::models::{AccessMode, BackendKind, QueryRequest, QueryResult, SchemaInfo};
use crate::registry::{Registry, SharedRegistry};
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

/// One configured database as shown to callers (no connection details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct DatabaseSummary {
    pub alias: String,
    pub backend_kind: BackendKind,
    pub access_mode: AccessMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SharedRegistry>,
    pools: ConnectionManager,
    executor: QueryExecutor,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self::with_executor(registry, QueryExecutor::new())
    }

    pub fn with_executor(registry: Registry, executor: QueryExecutor) -> Self {
        Self {
            registry: Arc::new(SharedRegistry::new(registry)),
            pools: ConnectionManager::new(),
            executor,
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.current()
    }

    pub fn pools(&self) -> &ConnectionManager {
        &self.pools
    }

    /// Configured aliases in alias order.
    pub fn list_databases(&self) -> Vec<DatabaseSummary> {
        self.registry
            .current()
            .list()
            .iter()
            .map(|d| DatabaseSummary {
                alias: d.alias.clone(),
                backend_kind: d.kind,
                access_mode: d.access_mode,
                description: d.description.clone(),
            })
            .collect()
    }

    /// List tables, or describe one table when `target` is given.
    pub async fn describe_schema(
        &self,
        alias: &str,
        target: Option<&str>,
    ) -> Result<SchemaInfo, QueryError> {
        let pool = self.pools.pool_for(&self.registry, alias).await?;
        impl_db_dispatch!(&pool, {
            MySql(p) => self.executor.describe(p, target).await,
            Postgres(p) => self.executor.describe(p, target).await,
            Sqlite(p) => self.executor.describe(p, target).await,
        })
    }

    pub async fn execute_query(&self, request: &QueryRequest) -> Result<QueryResult, QueryError> {
        let pool = self.pools.pool_for(&self.registry, &request.alias).await?;
        impl_db_dispatch!(&pool, {
            MySql(p) => self.executor.run(p, request).await,
            Postgres(p) => self.executor.run(p, request).await,
            Sqlite(p) => self.executor.run(p, request).await,
        })
    }

    /// Validate and atomically install a new configuration, then close
    /// pools of aliases that were removed or changed. On error the
    /// previous registry stays active.
    pub async fn reload(&self, doc: &ConfigDocument) -> DbResult<()> {
        let registry = self.registry.reload(doc)?;
        self.pools.retain(&registry).await;
        Ok(())
    }

    /// Try one connection per alias. Returns the aliases that failed.
    pub async fn check_connections(&self, aliases: Option<&[String]>) -> Vec<String> {
        let registry = self.registry.current();
        let mut failed = Vec::new();
        for descriptor in registry.list() {
            if aliases.is_some_and(|only| !only.contains(&descriptor.alias)) {
                continue;
            }
            // Removed by a concurrent reload
            let Ok(pool) = self.pools.pool_for(&self.registry, &descriptor.alias).await else {
                continue;
            };
            match pool.check().await {
                Ok(()) => info!(
                    alias = %descriptor.alias,
                    kind = %descriptor.kind,
                    location = %descriptor.target.masked(),
                    "Database reachable"
                ),
                Err(e) => {
                    warn!(
                        alias = %descriptor.alias,
                        location = %descriptor.target.masked(),
                        error = %e,
                        "Database unreachable"
                    );
                    failed.push(descriptor.alias.clone());
                }
            }
        }
        failed
    }

    pub async fn shutdown(&self) {
        self.pools.close_all().await;
    }
}

/// Background re-check of aliases that failed to connect.
///
/// At most one loop runs: scheduling again aborts the previous one, so
/// repeated reloads never stack reconnect tasks.
#[derive(Debug, Default)]
pub struct ReconnectTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any running loop with one retrying `failed` every `interval`
    /// until all of them connect.
    pub fn schedule(&self, dispatcher: Dispatcher, mut failed: Vec<String>, interval: Duration) {
        let mut slot = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        if failed.is_empty() {
            return;
        }
        info!(
            aliases = ?failed,
            interval_secs = interval.as_secs(),
            "Scheduling reconnect attempts"
        );
        *slot = Some(tokio::spawn(async move {
            while !failed.is_empty() {
                tokio::time::sleep(interval).await;
                failed = dispatcher.check_connections(Some(&failed)).await;
            }
            info!("All databases reachable");
        }));
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        let slot = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().map(JoinHandle::abort_handle)
    }

    pub fn is_running(&self) -> bool {
        self.abort_handle().is_some_and(|h| !h.is_finished())
    }
}
