//! Pool manager: one pool per target plus retrying query execution

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use sqlpool_core::{Connection, ConnectionFactory, DriverError, QueryResult, Row, Value};

use crate::config::ManagerConfig;
use crate::error::{ConfigError, ErrorKind, ExecutionError, PoolError};
use crate::pool::{ConnectionPool, PoolStats};
use crate::retry::{DefaultClassifier, ErrorClassifier, RetryPolicy};

/// Characters of SQL text included in log lines
const SQL_PREVIEW_CHARS: usize = 100;

/// Value produced by [`PoolManager::execute`] and the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub value: T,
    pub attempts: u32,
}

/// Result of [`PoolManager::execute_with_retry`]
///
/// Failures are reported in-band: `success` is false and `error_kind`
/// and `error_message` describe the last failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Attempts made, 0 when the request was rejected up front
    pub attempts: u32,
}

impl QueryOutcome {
    fn succeeded(result: QueryResult, attempts: u32) -> Self {
        Self {
            success: true,
            columns: result.columns,
            rows: result.rows,
            error_kind: None,
            error_message: None,
            attempts,
        }
    }

    fn failed(error: ExecutionError) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            error_kind: Some(error.kind),
            error_message: Some(error.message),
            attempts: error.attempts,
        }
    }

    /// Rows as records keyed by column name
    pub fn records(&self) -> Vec<HashMap<String, Value>> {
        self.rows.iter().map(Row::to_map).collect()
    }

    /// Turn the outcome back into a `Result`
    pub fn into_result(self) -> Result<Vec<Row>, ExecutionError> {
        match self.error_kind {
            Some(kind) if !self.success => Err(ExecutionError::new(
                kind,
                self.error_message.unwrap_or_default(),
                self.attempts,
            )),
            _ => Ok(self.rows),
        }
    }
}

#[derive(Default)]
struct PoolRegistry {
    pools: HashMap<String, Arc<ConnectionPool>>,
    closed: bool,
}

/// Owns one [`ConnectionPool`] per target and runs queries against them
/// with classification and retry.
///
/// Pools are created on first use, each with its own health checker, and
/// all share the manager's connection factory.
pub struct PoolManager {
    config: ManagerConfig,
    factory: Arc<dyn ConnectionFactory>,
    classifier: Arc<dyn ErrorClassifier>,
    retry: RetryPolicy,
    registry: RwLock<PoolRegistry>,
}

impl PoolManager {
    /// Create a manager after validating `config`
    pub fn new<F: ConnectionFactory>(
        config: ManagerConfig,
        factory: F,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            max_retries = config.max_retries,
            "pool manager created"
        );
        Ok(Self {
            retry: config.retry_policy(),
            config,
            factory: Arc::new(factory),
            classifier: Arc::new(DefaultClassifier),
            registry: RwLock::new(PoolRegistry::default()),
        })
    }

    /// Replace the built-in error classifier
    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The pool for `target`, created (and its health checker started) on
    /// first use. Must be called from within a Tokio runtime.
    pub fn pool(&self, target: &str) -> Result<Arc<ConnectionPool>, PoolError> {
        if let Some(pool) = self.registry.read().pools.get(target) {
            return Ok(pool.clone());
        }

        let mut registry = self.registry.write();
        if registry.closed {
            return Err(PoolError::Closed(target.to_string()));
        }
        let pool = registry
            .pools
            .entry(target.to_string())
            .or_insert_with(|| {
                let pool = ConnectionPool::with_shared_factory(
                    target,
                    self.config.pool_config(),
                    self.factory.clone(),
                );
                pool.start_health_checker(self.config.health_check_config());
                tracing::info!(target_name = %target, "created connection pool");
                Arc::new(pool)
            })
            .clone();
        Ok(pool)
    }

    /// Run `operation` on a pooled connection to `target`, retrying
    /// retryable failures on fresh connections.
    ///
    /// Each attempt borrows a connection with the configured connection
    /// timeout and gives the operation `timeout` to finish. A connection
    /// that saw a failure is destroyed, never returned to the pool. Pool
    /// failures (acquire timeout, connection creation, closed pool) end the
    /// execution immediately.
    #[tracing::instrument(skip_all, fields(target_name = %target))]
    pub async fn execute<T, F>(
        &self,
        target: &str,
        timeout: Duration,
        mut operation: F,
    ) -> Result<Executed<T>, ExecutionError>
    where
        F: for<'c> FnMut(&'c dyn Connection) -> BoxFuture<'c, sqlpool_core::Result<T>>,
    {
        let pool = self
            .pool(target)
            .map_err(|e| ExecutionError::new(e.kind(), e.to_string(), 1))?;
        let mut attempt: u32 = 0;

        loop {
            let conn = match pool.acquire(self.config.connection_timeout()).await {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::error!(
                        attempt = attempt + 1,
                        kind = %error.kind(),
                        error = %error,
                        "could not acquire connection"
                    );
                    return Err(ExecutionError::new(
                        error.kind(),
                        error.to_string(),
                        attempt + 1,
                    ));
                }
            };

            let result = match tokio::time::timeout(timeout, operation(&*conn)).await {
                Ok(result) => result,
                Err(_) => Err(DriverError::Timeout(format!(
                    "operation did not finish within {:?}",
                    timeout
                ))),
            };

            let error = match result {
                Ok(value) => {
                    pool.release(conn, true);
                    if attempt > 0 {
                        tracing::info!(attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(Executed {
                        value,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => error,
            };

            let kind = self.classifier.classify(&error);
            pool.release(conn, false);

            if !self.retry.should_retry(kind, attempt) {
                if kind.is_retryable() {
                    tracing::error!(
                        attempts = attempt + 1,
                        kind = %kind,
                        error = %error,
                        "retries exhausted"
                    );
                } else {
                    tracing::debug!(kind = %kind, error = %error, "failure is not retryable");
                }
                return Err(ExecutionError::new(kind, error.to_string(), attempt + 1));
            }

            pool.record_retry();
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                kind = %kind,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run `sql` against `target` and report the outcome in-band.
    ///
    /// Empty SQL or an empty target is rejected with
    /// [`ErrorKind::InvalidInput`] and zero attempts, without touching any
    /// pool.
    #[tracing::instrument(skip_all, fields(target_name = %target))]
    pub async fn execute_with_retry(
        &self,
        sql: &str,
        target: &str,
        timeout: Duration,
    ) -> QueryOutcome {
        if sql.trim().is_empty() {
            return QueryOutcome::failed(ExecutionError::new(
                ErrorKind::InvalidInput,
                "SQL query must not be empty",
                0,
            ));
        }
        if target.trim().is_empty() {
            return QueryOutcome::failed(ExecutionError::new(
                ErrorKind::InvalidInput,
                "target must not be empty",
                0,
            ));
        }

        tracing::debug!(sql = %sql_preview(sql), "executing query");
        let sql: Arc<str> = Arc::from(sql);
        let executed = self
            .execute(target, timeout, move |conn| {
                let sql = sql.clone();
                async move { conn.query(&sql).await }.boxed()
            })
            .await;

        match executed {
            Ok(Executed { value, attempts }) => {
                tracing::debug!(rows = value.row_count(), attempts, "query succeeded");
                QueryOutcome::succeeded(value, attempts)
            }
            Err(error) => QueryOutcome::failed(error),
        }
    }

    /// Statistics summed over every target
    ///
    /// `max_connections` and `min_connections` report the per-pool
    /// configuration.
    pub fn get_stats(&self) -> PoolStats {
        let mut total = PoolStats {
            max_connections: self.config.max_connections,
            min_connections: self.config.min_connections,
            ..PoolStats::default()
        };
        for pool in self.registry.read().pools.values() {
            total.merge(&pool.stats());
        }
        total
    }

    /// Statistics of one target's pool, if it exists
    pub fn stats_for(&self, target: &str) -> Option<PoolStats> {
        self.registry.read().pools.get(target).map(|pool| pool.stats())
    }

    /// Targets that have a pool, sorted
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<_> = self.registry.read().pools.keys().cloned().collect();
        targets.sort();
        targets
    }

    pub fn is_closed(&self) -> bool {
        self.registry.read().closed
    }

    /// Close every pool; later executions fail with `PoolClosed`
    ///
    /// Pools stay registered so their final statistics remain readable.
    /// Calling `close` again is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        let pools: Vec<_> = {
            let mut registry = self.registry.write();
            if std::mem::replace(&mut registry.closed, true) {
                return;
            }
            registry.pools.values().cloned().collect()
        };

        futures::future::join_all(pools.iter().map(|pool| pool.close())).await;
        tracing::info!(pools = pools.len(), "pool manager closed");
    }
}

fn sql_preview(sql: &str) -> String {
    let mut chars = sql.chars();
    let preview: String = chars.by_ref().take(SQL_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}
