//! Integration tests for the per-alias connection pool.
//!
//! These tests verify that:
//! - capacity is never exceeded and exhaustion is reported as such
//! - idle connections are reused and failed health checks flush them
//! - every acquire is paired with exactly one release
//! - a hung health check cannot outlast the acquire timeout
//! - expired idle connections are evicted on reuse and by the reaper

mod common;

use common::{MockDriver, descriptor, descriptor_with_limits};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use unified_db::db::connection_pool::Pool;
use unified_db::error::{DbError, ErrorKind};
use unified_db::models::{AccessMode, PoolLimits};

#[tokio::test]
async fn test_exhausted_pool_reports_pool_exhausted() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 2, Duration::from_millis(100)),
    );

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(matches!(err, DbError::PoolExhausted { waited_ms, .. } if waited_ms >= 100));

    let stats = pool.stats();
    assert_eq!(stats.in_use, 2);
    assert_eq!(stats.idle, 0);

    drop(first);
    let _third = pool.acquire().await.unwrap();
    assert_eq!(driver.opened(), 2, "released connection should be reused");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_never_exceeded_under_contention() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 3, Duration::from_secs(10)),
    );

    let mut workers = Vec::new();
    for _ in 0..30 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            let lease = pool.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(lease);
        }));
    }

    let sampler = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut samples = 0;
            loop {
                let stats = pool.stats();
                assert!(
                    stats.in_use + stats.idle <= 3,
                    "in_use {} + idle {} exceeds max_size",
                    stats.in_use,
                    stats.idle
                );
                samples += 1;
                if stats.acquired == 30 && stats.released == 30 {
                    return samples;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    assert!(sampler.await.unwrap() > 0);
    assert!(driver.opened() <= 3);

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.idle, driver.opened());
}

#[tokio::test]
async fn test_failed_ping_flushes_idle_set() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 4, Duration::from_secs(1)),
    );

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.stats().idle, 2);

    driver.ping_ok.store(false, Ordering::SeqCst);
    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.id(), 3, "a fresh connection replaces the suspect ones");

    let stats = pool.stats();
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_broken_lease_is_discarded() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 1, Duration::from_secs(1)),
    );

    let mut lease = pool.acquire().await.unwrap();
    lease.mark_broken();
    drop(lease);

    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.acquired, stats.released);

    // The close runs on a spawned task
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1);
}

#[tokio::test]
async fn test_lease_dropped_mid_statement_is_discarded() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 1, Duration::from_secs(1)),
    );

    let mut lease = pool.acquire().await.unwrap();
    lease.mark_in_flight();
    drop(lease);
    assert_eq!(pool.stats().discarded, 1);

    let mut lease = pool.acquire().await.unwrap();
    lease.mark_in_flight();
    lease.mark_settled();
    drop(lease);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_open_failure_releases_capacity() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 1, Duration::from_millis(200)),
    );

    driver.fail_open.store(true, Ordering::SeqCst);
    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);

    driver.fail_open.store(false, Ordering::SeqCst);
    pool.check().await.unwrap();
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_closed_pool_refuses_leases() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 2, Duration::from_secs(1)),
    );
    let outstanding = pool.acquire().await.unwrap();
    pool.check().await.unwrap();
    assert_eq!(pool.stats().idle, 1);

    pool.close().await;
    assert_eq!(driver.closed(), 1, "idle connection closed");

    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

    drop(outstanding);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn test_hung_ping_is_bounded_by_acquire_timeout() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor(AccessMode::ReadOnly, 1, Duration::from_millis(100)),
    );
    pool.check().await.unwrap();
    assert_eq!(pool.stats().idle, 1);

    driver.ping_hangs.store(true, Ordering::SeqCst);
    let started = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
        .await
        .expect("acquire must not hang on a stuck health check");
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

    // Either a fresh connection fit in the leftover budget or the open timed out
    match outcome {
        Ok(lease) => assert_eq!(lease.id(), 2),
        Err(err) => assert_eq!(err.kind(), ErrorKind::Connect),
    }
    let stats = pool.stats();
    assert_eq!(stats.discarded, 1, "the unresponsive connection is dropped");
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_idle_timeout_evicts_on_reuse() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor_with_limits(
            AccessMode::ReadOnly,
            PoolLimits {
                max_size: 1,
                idle_timeout: Some(Duration::from_millis(50)),
                acquire_timeout: Duration::from_secs(1),
                max_lifetime: None,
            },
        ),
    );
    pool.check().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.id(), 2, "the expired connection is not handed out");
    assert_eq!(driver.opened(), 2);
    assert_eq!(pool.stats().discarded, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1);
}

#[tokio::test]
async fn test_max_lifetime_evicts_busy_connection() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::new(
        Arc::clone(&driver),
        descriptor_with_limits(
            AccessMode::ReadOnly,
            PoolLimits {
                max_size: 1,
                idle_timeout: None,
                acquire_timeout: Duration::from_secs(1),
                max_lifetime: Some(Duration::from_millis(50)),
            },
        ),
    );

    // Keep the connection busy so only its age can expire it
    for _ in 0..4 {
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.id(), 1);
        drop(lease);
    }
    tokio::time::sleep(Duration::from_millis(80)).await;

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.id(), 2);
    assert_eq!(pool.stats().discarded, 1);
}

#[tokio::test]
async fn test_reaper_evicts_without_acquire() {
    let driver = MockDriver::new(Duration::ZERO);
    let pool = Pool::with_reap_interval(
        Arc::clone(&driver),
        descriptor_with_limits(
            AccessMode::ReadOnly,
            PoolLimits {
                max_size: 2,
                idle_timeout: Some(Duration::from_millis(30)),
                acquire_timeout: Duration::from_secs(1),
                max_lifetime: None,
            },
        ),
        Duration::from_millis(20),
    );
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.stats().idle, 2);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.acquired, 2, "eviction needed no acquire");
    assert_eq!(driver.closed(), 2);
}
