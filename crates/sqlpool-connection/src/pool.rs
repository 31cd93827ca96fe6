//! Connection pooling for warehouse connections
//!
//! This module provides a bounded pool per target with explicit
//! acquire/release, age-based recycling, and statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use sqlpool_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(2, 16)
//!     .with_connection_timeout_ms(5_000)
//!     .with_max_connection_age_ms(3_600_000);
//!
//! let pool = ConnectionPool::new("ANALYTICS", config, connection_factory);
//! let conn = pool.get().await?;
//! let result = conn.query("SELECT 1").await;
//! conn.release(result.is_ok());
//! ```

mod config;
#[allow(clippy::module_inception)]
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::{ConnectionPool, PooledConnection};
pub use stats::PoolStats;

pub(crate) use pool::{FAR_FUTURE, PoolShared, deadline_after};
