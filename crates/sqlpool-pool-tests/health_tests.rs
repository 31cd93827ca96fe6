//! Health checker tests against the scripted backend

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use sqlpool_connection::{ConnectionPool, HealthCheckConfig, HealthCheckerState, PoolConfig};

use crate::fixtures::{ScriptedBackend, backend};

const PING_TIMEOUT: Duration = Duration::from_millis(200);

fn pool_with(backend: &ScriptedBackend, config: PoolConfig) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::with_shared_factory(
        "WAREHOUSE",
        config,
        Arc::new(backend.factory()),
    ))
}

#[rstest]
#[tokio::test]
async fn test_idle_connections_are_younger_than_max_age_after_pass(
    backend: ScriptedBackend,
) -> anyhow::Result<()> {
    let pool = pool_with(&backend, PoolConfig::new(1, 4).with_max_connection_age_ms(80));

    let first = pool.get().await?;
    let second = pool.get().await?;
    first.release(true);
    second.release(true);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = pool.run_health_check(PING_TIMEOUT).await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.expired, 2);
    assert_eq!(report.created, 1);
    assert_eq!(backend.closed(), 2);

    let conn = pool.get().await?;
    assert!(conn.age() < Duration::from_millis(80));
    assert_eq!(conn.id(), 3);
    conn.release(true);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_background_checker_replaces_dead_connections(
    backend: ScriptedBackend,
) -> anyhow::Result<()> {
    let pool = pool_with(&backend, PoolConfig::new(2, 4));
    pool.run_health_check(PING_TIMEOUT).await;
    assert_eq!(backend.opened(), 2);

    backend.fail_pings(true);
    assert!(pool.start_health_checker(
        HealthCheckConfig::new(Duration::from_millis(30)).with_ping_timeout(PING_TIMEOUT)
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    backend.fail_pings(false);
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The first pass evicted both and refilled
    assert!(backend.closed() >= 2);
    assert!(backend.opened() >= 4);
    let stats = pool.stats();
    assert_eq!(stats.total_connections, 2);
    assert!(stats.total_health_checks >= 2);

    pool.close().await;
    assert_eq!(
        pool.health_checker_state(),
        Some(HealthCheckerState::Stopped)
    );
    assert_eq!(backend.live(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_pass_on_closed_pool_does_nothing(backend: ScriptedBackend) -> anyhow::Result<()> {
    let pool = pool_with(&backend, PoolConfig::new(2, 4));
    pool.close().await;

    let report = pool.run_health_check(PING_TIMEOUT).await;
    assert_eq!(report.checked, 0);
    assert_eq!(report.created, 0);
    assert_eq!(backend.opened(), 0);
    Ok(())
}
