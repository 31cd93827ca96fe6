//! Scripted in-memory backend and shared fixtures for pool testing.
//!
//! [`ScriptedBackend`] hands out connections whose query replies come from
//! a shared script. Tests push replies (rows, failures, hangs) in the order
//! the backend should produce them; once the script runs dry every query
//! returns a single row with the value `1`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlpool_pool_tests::fixtures::{backend, network_error, test_manager, Reply, ScriptedBackend};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn test_retry(backend: ScriptedBackend) {
//!     backend.push(Reply::Fail(network_error));
//!     let manager = test_manager(&backend, test_config());
//!     let outcome = manager.execute_with_retry("SELECT 1", "ANALYTICS", QUERY_TIMEOUT).await;
//!     assert_eq!(outcome.attempts, 2);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rstest::fixture;
use sqlpool_connection::{ManagerConfig, PoolManager};
use sqlpool_core::{Connection, ConnectionFactory, DriverError, QueryResult, Result, Value};

/// Per-attempt query timeout used by most manager tests
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// One scripted reply to a query
pub enum Reply {
    /// Return these rows
    Rows(QueryResult),
    /// Fail with the error the function builds
    Fail(fn() -> DriverError),
    /// Never answer
    Hang,
}

/// A dropped connection, retryable
pub fn network_error() -> DriverError {
    DriverError::Connection("connection reset by peer".into())
}

/// A statement the warehouse rejected, fatal
pub fn syntax_error() -> DriverError {
    DriverError::query_with_code(
        "001003",
        "SQL compilation error: syntax error line 1 at position 0 unexpected 'SELEC'.",
    )
}

/// A missing grant, fatal
pub fn permission_error() -> DriverError {
    DriverError::query_with_code("42501", "Insufficient privileges to operate on table 'ORDERS'")
}

/// A statement timeout reported by the warehouse, retryable
pub fn timeout_error() -> DriverError {
    DriverError::Timeout("statement reached its statement or warehouse timeout".into())
}

/// A result with an `ID` and `NAME` column and `count` rows
pub fn orders_result(count: i64) -> QueryResult {
    QueryResult::new(
        vec!["ID".into(), "NAME".into()],
        (1..=count)
            .map(|id| vec![Value::Int64(id), Value::String(format!("order-{}", id))])
            .collect(),
    )
}

#[derive(Default)]
struct BackendState {
    script: Mutex<VecDeque<Reply>>,
    /// (connection id, sql) for every query that reached the backend
    executed: Mutex<Vec<(u64, String)>>,
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    refuse_connect: AtomicBool,
    fail_ping: AtomicBool,
    hang_close: AtomicBool,
}

/// Handle to a scripted backend; clones share the same state
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<BackendState>,
}

impl ScriptedBackend {
    /// Create a backend with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reply
    pub fn push(&self, reply: Reply) -> &Self {
        self.state.script.lock().push_back(reply);
        self
    }

    /// Queue `count` failures built by `error`
    pub fn push_failures(&self, error: fn() -> DriverError, count: usize) -> &Self {
        for _ in 0..count {
            self.push(Reply::Fail(error));
        }
        self
    }

    /// Make new connection attempts fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Make pings fail (or succeed again)
    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Make `close` never return (or return again)
    pub fn hang_closes(&self, hang: bool) {
        self.state.hang_close.store(hang, Ordering::SeqCst);
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Every query the backend has seen, with the connection that ran it
    pub fn executed(&self) -> Vec<(u64, String)> {
        self.state.executed.lock().clone()
    }

    /// Replies still queued
    pub fn remaining(&self) -> usize {
        self.state.script.lock().len()
    }

    /// A connection factory backed by this backend
    pub fn factory(&self) -> ScriptedFactory {
        ScriptedFactory {
            state: self.state.clone(),
        }
    }
}

/// Opens [`ScriptedConnection`]s
pub struct ScriptedFactory {
    state: Arc<BackendState>,
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self, target: &str) -> Result<Box<dyn Connection>> {
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(DriverError::Connection(format!(
                "connection refused by {}",
                target
            )));
        }
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(connection_id = id, target_name = %target, "scripted connection opened");
        Ok(Box::new(ScriptedConnection {
            id,
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A connection that answers from the backend's script
pub struct ScriptedConnection {
    id: u64,
    state: Arc<BackendState>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn driver_name(&self) -> &str {
        "scripted"
    }

    async fn query(&self, sql: &str) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        self.state.executed.lock().push((self.id, sql.to_string()));

        let reply = self.state.script.lock().pop_front();
        match reply {
            Some(Reply::Rows(result)) => Ok(result),
            Some(Reply::Fail(error)) => Err(error()),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(QueryResult::new(
                vec!["1".into()],
                vec![vec![Value::Int64(1)]],
            )),
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(network_error());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.state.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Let connection closes spawned by releases run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Manager settings sized for fast tests
///
/// No warm minimum, a 4-connection cap, 10ms retry delay, and a health
/// interval long enough that the checker never runs unless a test asks.
pub fn test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_min_connections(0)
        .with_max_connections(4)
        .with_connection_timeout(Duration::from_secs(1))
        .with_health_check_interval(Duration::from_secs(3600))
        .with_shutdown_timeout(Duration::from_secs(2))
        .with_close_timeout(Duration::from_millis(200))
        .with_retry_delay(Duration::from_millis(10))
}

/// Build a manager over `backend`
pub fn test_manager(backend: &ScriptedBackend, config: ManagerConfig) -> PoolManager {
    PoolManager::new(config, backend.factory()).expect("test config is valid")
}

/// rstest fixture: a fresh backend, with logging initialized
#[fixture]
pub fn backend() -> ScriptedBackend {
    initialize_logging();
    ScriptedBackend::new()
}

/// Initialize logging for tests if not already initialized
///
/// This sets up tracing with appropriate filters for test output.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("sqlpool_connection=debug".parse().unwrap())
                    .add_directive("sqlpool_pool_tests=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
