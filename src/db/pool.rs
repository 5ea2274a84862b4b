//! Pool management across aliases.
//!
//! [`ConnectionManager`] owns one [`Pool`] per alias, created lazily on
//! first use with the driver matching the descriptor's backend kind.
//! Dispatch is static: [`DbPool`] is a closed enum over the three drivers.

use crate::db::connection_pool::{Pool, PoolStats};
use crate::db::driver::{MySqlDriver, PostgresDriver, SqliteDriver};
use crate::error::DbResult;
use crate::impl_db_dispatch;
use crate::models::{BackendKind, DatabaseDescriptor};
use crate::registry::{Registry, SharedRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Backend-specific pool (static dispatch by backend kind).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(Pool<MySqlDriver>),
    Postgres(Pool<PostgresDriver>),
    Sqlite(Pool<SqliteDriver>),
}

impl DbPool {
    pub fn new(descriptor: Arc<DatabaseDescriptor>) -> Self {
        match descriptor.kind {
            BackendKind::MySql => DbPool::MySql(Pool::new(Arc::new(MySqlDriver), descriptor)),
            BackendKind::Postgres => {
                DbPool::Postgres(Pool::new(Arc::new(PostgresDriver), descriptor))
            }
            BackendKind::Sqlite => DbPool::Sqlite(Pool::new(Arc::new(SqliteDriver), descriptor)),
        }
    }

    pub fn descriptor(&self) -> &Arc<DatabaseDescriptor> {
        impl_db_dispatch!(self, {
            MySql(p) => p.descriptor(),
            Postgres(p) => p.descriptor(),
            Sqlite(p) => p.descriptor(),
        })
    }

    pub fn stats(&self) -> PoolStats {
        impl_db_dispatch!(self, {
            MySql(p) => p.stats(),
            Postgres(p) => p.stats(),
            Sqlite(p) => p.stats(),
        })
    }

    /// Open (or reuse) one connection to prove the alias is reachable.
    pub async fn check(&self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(p) => p.check().await,
            Postgres(p) => p.check().await,
            Sqlite(p) => p.check().await,
        })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(p) => p.close().await,
            Postgres(p) => p.close().await,
            Sqlite(p) => p.close().await,
        })
    }
}

/// Lazily-created pools keyed by alias.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    pools: Arc<RwLock<HashMap<String, DbPool>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pool for `alias` as the registry currently defines it,
    /// creating it on first use.
    ///
    /// The descriptor is resolved from the live registry, and re-resolved
    /// under the write lock before a pool is created, so a caller that raced
    /// a reload can never reinstate an outdated pool. A pool built from an
    /// older descriptor for the same alias is replaced and closed.
    pub async fn pool_for(&self, registry: &SharedRegistry, alias: &str) -> DbResult<DbPool> {
        {
            let current = registry.current().resolve(alias)?;
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(alias) {
                if pool.descriptor() == &current {
                    return Ok(pool.clone());
                }
            }
        }

        let (pool, replaced) = {
            let mut pools = self.pools.write().await;
            // Reloads swap the registry before pruning pools, which needs this
            // lock, so the registry read here is the one retain will see
            let current = registry.current().resolve(alias)?;
            match pools.get(alias) {
                Some(pool) if pool.descriptor() == &current => (pool.clone(), None),
                _ => {
                    debug!(alias = %current.alias, kind = %current.kind, "Creating connection pool");
                    let pool = DbPool::new(current);
                    let replaced = pools.insert(alias.to_string(), pool.clone());
                    (pool, replaced)
                }
            }
        }; // Write lock released here

        if let Some(old) = replaced {
            info!(alias = %alias, "Descriptor changed, closing previous pool");
            old.close().await;
        }
        Ok(pool)
    }

    /// Drop pools whose alias vanished or whose descriptor changed.
    pub async fn retain(&self, registry: &Registry) {
        let stale: Vec<DbPool> = {
            let mut pools = self.pools.write().await;
            let aliases: Vec<String> = pools
                .iter()
                .filter(|(alias, pool)| {
                    registry
                        .resolve(alias)
                        .map(|current| &current != pool.descriptor())
                        .unwrap_or(true)
                })
                .map(|(alias, _)| alias.clone())
                .collect();
            aliases
                .iter()
                .filter_map(|alias| pools.remove(alias))
                .collect()
        };

        for pool in stale {
            info!(alias = %pool.descriptor().alias, "Closing pool for removed or changed alias");
            pool.close().await;
        }
    }

    pub async fn stats(&self, alias: &str) -> Option<PoolStats> {
        self.pools.read().await.get(alias).map(DbPool::stats)
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        // Drain pools under lock, close outside lock
        let pools: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::AccessMode;
    use tempfile::TempDir;

    fn sqlite(dir: &TempDir, alias: &str, mode: AccessMode) -> DatabaseDescriptor {
        DatabaseDescriptor::sqlite(alias, dir.path().join(format!("{alias}.db")), mode)
    }

    fn shared(descriptors: Vec<DatabaseDescriptor>) -> SharedRegistry {
        SharedRegistry::new(Registry::from_descriptors(descriptors).unwrap())
    }

    fn swap(registry: &SharedRegistry, descriptors: Vec<DatabaseDescriptor>) -> Arc<Registry> {
        let next = Arc::new(Registry::from_descriptors(descriptors).unwrap());
        registry.replace(Arc::clone(&next));
        next
    }

    #[tokio::test]
    async fn test_pool_reused_for_same_descriptor() {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new();
        let registry = shared(vec![sqlite(&dir, "a", AccessMode::ReadWrite)]);

        manager.pool_for(&registry, "a").await.unwrap();
        manager.pool_for(&registry, "a").await.unwrap();
        assert_eq!(manager.pool_count().await, 1);
    }

    #[tokio::test]
    async fn test_changed_descriptor_replaces_pool() {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new();
        let registry = shared(vec![sqlite(&dir, "a", AccessMode::ReadWrite)]);
        let pool = manager.pool_for(&registry, "a").await.unwrap();
        pool.check().await.unwrap();
        assert_eq!(manager.stats("a").await.unwrap().idle, 1);

        swap(&registry, vec![sqlite(&dir, "a", AccessMode::ReadOnly)]);
        let replaced = manager.pool_for(&registry, "a").await.unwrap();
        assert!(replaced.descriptor().is_read_only());
        assert_eq!(manager.stats("a").await.unwrap().opened, 0);
    }

    #[tokio::test]
    async fn test_request_spanning_reload_keeps_current_pool() {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new();
        let registry = shared(vec![sqlite(&dir, "a", AccessMode::ReadWrite)]);
        let old = manager.pool_for(&registry, "a").await.unwrap();
        old.check().await.unwrap();

        // Reload lands while a request still holds the old pool
        let next = swap(&registry, vec![sqlite(&dir, "a", AccessMode::ReadOnly)]);
        manager.retain(&next).await;
        let fresh = manager.pool_for(&registry, "a").await.unwrap();
        fresh.check().await.unwrap();

        // The late request asks again and must not evict the new pool
        let late = manager.pool_for(&registry, "a").await.unwrap();
        assert!(late.descriptor().is_read_only());
        assert!(!old.descriptor().is_read_only());
        assert_eq!(manager.pool_count().await, 1);
        assert_eq!(manager.stats("a").await.unwrap().idle, 1);
        fresh.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_alias_is_not_recreated() {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new();
        let registry = shared(vec![sqlite(&dir, "a", AccessMode::ReadWrite)]);
        manager.pool_for(&registry, "a").await.unwrap();

        let next = swap(&registry, vec![sqlite(&dir, "b", AccessMode::ReadWrite)]);
        manager.retain(&next).await;

        let err = manager.pool_for(&registry, "a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(manager.pool_count().await, 0);
    }

    #[tokio::test]
    async fn test_retain_drops_removed_aliases() {
        let dir = TempDir::new().unwrap();
        let manager = ConnectionManager::new();
        let keep = sqlite(&dir, "keep", AccessMode::ReadWrite);
        let registry = shared(vec![keep.clone(), sqlite(&dir, "gone", AccessMode::ReadWrite)]);
        manager.pool_for(&registry, "keep").await.unwrap();
        manager.pool_for(&registry, "gone").await.unwrap();

        let next = Registry::from_descriptors(vec![keep]).unwrap();
        manager.retain(&next).await;
        assert_eq!(manager.pool_count().await, 1);
        assert!(manager.stats("gone").await.is_none());
    }
}
