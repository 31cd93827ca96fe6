//! sqlpool connection - pooled warehouse connections with retry and health checking
//!
//! This crate keeps one bounded pool per target, recycles connections by
//! age and health, and runs queries with classified, backed-off retries.

mod config;
mod error;
pub mod health;
mod manager;
pub mod pool;
pub mod retry;

pub use config::{ENV_PREFIX, ManagerConfig};
pub use error::{ConfigError, ErrorKind, ExecutionError, PoolError, Result};
pub use health::{
    HealthCheckConfig, HealthCheckHandle, HealthCheckReport, HealthCheckerState, HealthStatus,
    PingError, PingResult, ping_connection,
};
pub use manager::{Executed, PoolManager, QueryOutcome};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use retry::{DefaultClassifier, ErrorClassifier, RetryPolicy, classify};
