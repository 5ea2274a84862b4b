//! Per-alias connection pool.
//!
//! # Concurrency Safety
//!
//! - Capacity is a `Semaphore` with `max_size` permits. Every lease holds
//!   one permit, and a connection is only opened while holding a permit
//!   with the idle set empty, so `in_use + idle <= max_size` at all times.
//! - The idle set sits behind a `std::sync::Mutex` that is never held
//!   across an await point.
//! - A [`Lease`] returns its connection in `Drop`, so release happens on
//!   every exit path including errors, panics and dropped futures. The
//!   idle push happens before the permit is released, so a waiter woken
//!   by the permit sees the returned connection.
//! - The reaper task holds only a `Weak` reference and exits once the
//!   pool is dropped.

use crate::db::driver::BackendDriver;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseDescriptor;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Health state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Idle,
    InUse,
    Broken,
}

/// One live backend connection plus its bookkeeping.
#[derive(Debug)]
pub struct PooledConnection<C> {
    pub id: u64,
    pub alias: Arc<str>,
    pub created_at: Instant,
    pub last_used: Instant,
    pub health: Health,
    conn: C,
}

impl<C> PooledConnection<C> {
    fn is_expired(&self, now: Instant, idle_timeout: Option<Duration>, max_lifetime: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|t| now.saturating_duration_since(self.last_used) > t)
            || max_lifetime.is_some_and(|t| now.saturating_duration_since(self.created_at) > t)
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub max_size: u32,
    pub in_use: u64,
    pub idle: u64,
    pub opened: u64,
    pub discarded: u64,
    pub acquired: u64,
    pub released: u64,
}

struct PoolInner<D: BackendDriver> {
    driver: Arc<D>,
    descriptor: Arc<DatabaseDescriptor>,
    alias: Arc<str>,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection<D::Connection>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    opened: AtomicU64,
    discarded: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<D: BackendDriver> PoolInner<D> {
    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<PooledConnection<D::Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close a connection off the request path.
    fn discard(&self, conn: PooledConnection<D::Connection>, reason: &'static str) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(alias = %self.alias, connection_id = conn.id, reason, "Discarding connection");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let driver = Arc::clone(&self.driver);
                handle.spawn(async move { driver.close(conn.conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    fn release(&self, mut conn: PooledConnection<D::Connection>) {
        self.released.fetch_add(1, Ordering::AcqRel);
        if conn.health == Health::Broken || self.closed.load(Ordering::Acquire) {
            self.discard(conn, "broken");
            return;
        }
        conn.health = Health::Idle;
        conn.last_used = Instant::now();
        self.lock_idle().push_back(conn);
    }
}

/// Bounded pool of connections for one alias.
pub struct Pool<D: BackendDriver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: BackendDriver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: BackendDriver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("alias", &self.inner.alias)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<D: BackendDriver> Pool<D> {
    /// Create an empty pool. Connections are opened on demand.
    ///
    /// Spawns the idle reaper when called inside a tokio runtime.
    pub fn new(driver: Arc<D>, descriptor: Arc<DatabaseDescriptor>) -> Self {
        Self::with_reap_interval(
            driver,
            descriptor,
            Duration::from_secs(crate::config::DEFAULT_REAP_INTERVAL_SECS),
        )
    }

    pub fn with_reap_interval(
        driver: Arc<D>,
        descriptor: Arc<DatabaseDescriptor>,
        reap_interval: Duration,
    ) -> Self {
        let max_size = descriptor.pool.max_size.max(1) as usize;
        let inner = Arc::new(PoolInner {
            driver,
            alias: Arc::from(descriptor.alias.as_str()),
            descriptor,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(VecDeque::with_capacity(max_size)),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            opened: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            reaper: Mutex::new(None),
        });

        let needs_reaper =
            inner.descriptor.pool.idle_timeout.is_some() || inner.descriptor.pool.max_lifetime.is_some();
        if needs_reaper {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let weak = Arc::downgrade(&inner);
                let task = handle.spawn(reap_task(weak, reap_interval));
                if let Ok(mut guard) = inner.reaper.lock() {
                    *guard = Some(task);
                }
            }
        }

        Self { inner }
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    pub fn descriptor(&self) -> &Arc<DatabaseDescriptor> {
        &self.inner.descriptor
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.inner.driver
    }

    /// Lease a connection, waiting up to the acquire timeout for capacity.
    pub async fn acquire(&self) -> DbResult<Lease<D>> {
        let inner = &self.inner;
        let limits = inner.descriptor.pool;
        let started = Instant::now();

        if inner.closed.load(Ordering::Acquire) {
            return Err(DbError::backend_unavailable(
                format!("pool for '{}' is closed", inner.alias),
                None,
            ));
        }

        let permit = match tokio::time::timeout(
            limits.acquire_timeout,
            Arc::clone(&inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DbError::backend_unavailable(
                    format!("pool for '{}' is closed", inner.alias),
                    None,
                ));
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(alias = %inner.alias, waited_ms, "Connection pool exhausted");
                return Err(DbError::pool_exhausted(inner.alias.to_string(), waited_ms));
            }
        };

        // Reuse an idle connection when one is still healthy
        loop {
            let candidate = inner.lock_idle().pop_back();
            let Some(mut conn) = candidate else {
                break;
            };
            if conn.is_expired(Instant::now(), limits.idle_timeout, limits.max_lifetime) {
                inner.discard(conn, "expired");
                continue;
            }
            // A ping that outlives the acquire budget counts as a failure
            let budget = limits.acquire_timeout.saturating_sub(started.elapsed());
            let healthy = tokio::time::timeout(budget, inner.driver.ping(&mut conn.conn))
                .await
                .unwrap_or(false);
            if healthy {
                return Ok(self.lease(conn, permit));
            }

            // The backend is suspect; drop every idle connection with this one
            warn!(
                alias = %inner.alias,
                connection_id = conn.id,
                "Idle connection failed health check, flushing idle set"
            );
            inner.discard(conn, "failed ping");
            let flushed: Vec<_> = inner.lock_idle().drain(..).collect();
            for stale in flushed {
                inner.discard(stale, "idle flush");
            }
            break;
        }

        let remaining = limits.acquire_timeout.saturating_sub(started.elapsed());
        let conn = match tokio::time::timeout(remaining, inner.driver.open(&inner.descriptor)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(alias = %inner.alias, error = %e, "Failed to open connection");
                return Err(e);
            }
            Err(_) => {
                let message = format!(
                    "timed out opening a connection for '{}' after {}ms",
                    inner.alias,
                    started.elapsed().as_millis()
                );
                warn!(alias = %inner.alias, "{message}");
                return Err(DbError::connect(message, None));
            }
        };

        let now = Instant::now();
        let pooled = PooledConnection {
            id: inner.next_id.fetch_add(1, Ordering::Relaxed),
            alias: Arc::clone(&inner.alias),
            created_at: now,
            last_used: now,
            health: Health::Idle,
            conn,
        };
        inner.opened.fetch_add(1, Ordering::Relaxed);
        debug!(alias = %inner.alias, connection_id = pooled.id, "Opened new connection");
        Ok(self.lease(pooled, permit))
    }

    fn lease(&self, mut conn: PooledConnection<D::Connection>, permit: OwnedSemaphorePermit) -> Lease<D> {
        conn.health = Health::InUse;
        self.inner.acquired.fetch_add(1, Ordering::AcqRel);
        Lease {
            conn: Some(conn),
            in_flight: false,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Open (or reuse) one connection and hand it straight back.
    pub async fn check(&self) -> DbResult<()> {
        self.acquire().await.map(drop)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let acquired = inner.acquired.load(Ordering::Acquire);
        let released = inner.released.load(Ordering::Acquire);
        PoolStats {
            max_size: inner.descriptor.pool.max_size,
            in_use: acquired.saturating_sub(released),
            idle: inner.lock_idle().len() as u64,
            opened: inner.opened.load(Ordering::Relaxed),
            discarded: inner.discarded.load(Ordering::Relaxed),
            acquired,
            released,
        }
    }

    /// Close idle connections and refuse new leases. Outstanding leases
    /// are discarded when they are released.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::Release);
        inner.permits.close();
        if let Ok(mut guard) = inner.reaper.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }

        let idle: Vec<_> = inner.lock_idle().drain(..).collect();
        for conn in idle {
            inner.discarded.fetch_add(1, Ordering::Relaxed);
            inner.driver.close(conn.conn).await;
        }
        info!(alias = %inner.alias, "Closed connection pool");
    }
}

/// Periodically evict idle connections past their idle timeout or lifetime.
async fn reap_task<D: BackendDriver>(weak: Weak<PoolInner<D>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let limits = inner.descriptor.pool;
        let now = Instant::now();
        let expired: Vec<_> = {
            let mut idle = inner.lock_idle();
            let (expired, keep): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|c| c.is_expired(now, limits.idle_timeout, limits.max_lifetime));
            idle.extend(keep);
            expired
        };
        if !expired.is_empty() {
            debug!(alias = %inner.alias, count = expired.len(), "Reaping idle connections");
        }
        for conn in expired {
            inner.discard(conn, "reaped");
        }
    }
}

/// Scoped lease on one pooled connection.
///
/// Dropping the lease releases it exactly once. A lease marked broken, or
/// dropped while a statement was in flight, discards its connection.
pub struct Lease<D: BackendDriver> {
    conn: Option<PooledConnection<D::Connection>>,
    in_flight: bool,
    pool: Arc<PoolInner<D>>,
    // Released after Drop::drop has returned the connection
    _permit: OwnedSemaphorePermit,
}

impl<D: BackendDriver> Lease<D> {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }

    pub fn connection_mut(&mut self) -> DbResult<&mut D::Connection> {
        self.conn
            .as_mut()
            .map(|c| &mut c.conn)
            .ok_or_else(|| DbError::backend_unavailable("connection lease already released", None))
    }

    /// A statement is on the wire; if the lease is dropped before
    /// [`mark_settled`](Self::mark_settled) the connection is discarded.
    pub fn mark_in_flight(&mut self) {
        self.in_flight = true;
    }

    pub fn mark_settled(&mut self) {
        self.in_flight = false;
    }

    pub fn mark_broken(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.health = Health::Broken;
        }
    }

    pub fn is_broken(&self) -> bool {
        self.conn.as_ref().is_none_or(|c| c.health == Health::Broken)
    }
}

impl<D: BackendDriver> Drop for Lease<D> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if self.in_flight {
                debug!(alias = %conn.alias, connection_id = conn.id, "Lease dropped mid-statement");
                conn.health = Health::Broken;
            }
            self.pool.release(conn);
        }
    }
}

impl<D: BackendDriver> std::fmt::Debug for Lease<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("alias", &self.pool.alias)
            .field("id", &self.id())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
