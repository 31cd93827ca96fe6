//! Configuration loading tests
//!
//! A manager built from a TOML file and environment overrides behaves the
//! way the file says.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use sqlpool_connection::{ConfigError, ErrorKind, ManagerConfig, PoolManager};

use crate::fixtures::{QUERY_TIMEOUT, Reply, ScriptedBackend, backend, network_error};

const POOL_TOML: &str = r#"
max_connections = 2
min_connections = 0
connection_timeout_ms = 500
health_check_interval_ms = 3600000
max_retries = 1
retry_delay_ms = 5
retry_backoff = 1.0
jitter_fraction = 0.0
"#;

fn write_config(content: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[rstest]
#[tokio::test]
async fn test_manager_from_toml_file(backend: ScriptedBackend) -> anyhow::Result<()> {
    let file = write_config(POOL_TOML)?;
    let config = ManagerConfig::load(file.path())?;

    assert_eq!(config.max_connections, 2);
    assert_eq!(config.connection_timeout(), Duration::from_millis(500));
    assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));

    let manager = PoolManager::new(config, backend.factory())?;
    assert_eq!(manager.retry_policy().max_retries(), 1);
    assert_eq!(manager.retry_policy().delay_for(3), Duration::from_millis(5));

    // max_retries = 1 allows exactly two attempts
    backend.push_failures(network_error, 2);
    let outcome = manager
        .execute_with_retry("SELECT 1", "REPORTING", QUERY_TIMEOUT)
        .await;
    assert_eq!(outcome.error_kind, Some(ErrorKind::Network));
    assert_eq!(outcome.attempts, 2);

    let stats = manager.get_stats();
    assert_eq!(stats.max_connections, 2);
    assert_eq!(stats.total_retries, 1);
    manager.close().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn test_environment_overrides_file(backend: ScriptedBackend) -> anyhow::Result<()> {
    let file = write_config(POOL_TOML)?;
    let env: HashMap<String, String> = [
        ("SQLPOOL_MAX_RETRIES", "0"),
        ("SQLPOOL_MAX_CONNECTIONS", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let config = ManagerConfig::load(file.path())?.with_env_overrides(|key| env.get(key).cloned())?;
    assert_eq!(config.max_connections, 3);
    assert_eq!(config.max_retries, 0);

    let manager = PoolManager::new(config, backend.factory())?;
    backend.push(Reply::Fail(network_error));
    let outcome = manager
        .execute_with_retry("SELECT 1", "REPORTING", QUERY_TIMEOUT)
        .await;
    assert_eq!(outcome.attempts, 1);
    assert_eq!(backend.opened(), 1);
    Ok(())
}

#[rstest]
#[case::zero_max("max_connections = 0", "max_connections")]
#[case::min_above_max("max_connections = 2\nmin_connections = 3", "min_connections")]
#[case::shrinking_backoff("retry_backoff = 0.5", "retry_backoff")]
#[case::jitter_above_one("jitter_fraction = 2.0", "jitter_fraction")]
fn test_manager_rejects_invalid_file(#[case] content: &str, #[case] expected_key: &str) {
    let config = ManagerConfig::from_toml_str(content).expect("toml parses");

    match PoolManager::new(config, ScriptedBackend::new().factory()) {
        Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, expected_key),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("{expected_key} should have been rejected"),
    }
}

#[test]
fn test_unknown_type_fails_to_parse() -> anyhow::Result<()> {
    let file = write_config("max_retries = \"three\"")?;
    let error = ManagerConfig::load(file.path()).unwrap_err();
    assert!(matches!(error, ConfigError::Parse(_)), "{error}");
    Ok(())
}
