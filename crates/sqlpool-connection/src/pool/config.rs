//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, and connection lifecycle.
/// Deserializing goes through the same bounds check as [`PoolConfig::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoolConfigFields")]
pub struct PoolConfig {
    /// Connections the health checker keeps open
    min_connections: usize,
    /// Hard cap on live connections (idle + borrowed + in flight)
    max_connections: usize,
    /// Default timeout in milliseconds when acquiring a connection
    connection_timeout_ms: u64,
    /// Age in milliseconds after which a connection is recycled
    max_connection_age_ms: u64,
    /// How long `close` waits for borrowed connections to come back
    shutdown_timeout_ms: u64,
    /// Bound on closing a single backend handle
    close_timeout_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// # Panics
    ///
    /// Panics if `min_connections > max_connections` or if `max_connections` is 0.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        if let Err(message) = check_bounds(min_connections, max_connections) {
            panic!("{}", message);
        }

        Self {
            min_connections,
            max_connections,
            connection_timeout_ms: 60_000,     // 1 minute default
            max_connection_age_ms: 3_600_000, // 1 hour default
            shutdown_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
        }
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum connection age in milliseconds
    pub fn with_max_connection_age_ms(mut self, age_ms: u64) -> Self {
        self.max_connection_age_ms = age_ms;
        self
    }

    /// Set how long `close` waits for outstanding borrows
    pub fn with_shutdown_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = timeout_ms;
        self
    }

    /// Set the bound on closing one backend handle
    pub fn with_close_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.close_timeout_ms = timeout_ms;
        self
    }

    /// Get the minimum pool size
    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Get the maximum pool size
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the acquire timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Get the maximum connection age as a Duration
    pub fn max_connection_age(&self) -> Duration {
        Duration::from_millis(self.max_connection_age_ms)
    }

    /// Get the shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Get the handle close timeout as a Duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_connections: 2
    /// - max_connections: 16
    /// - connection_timeout: 60 seconds
    /// - max_connection_age: 1 hour
    /// - shutdown_timeout: 30 seconds
    fn default() -> Self {
        Self::new(2, 16)
    }
}

fn check_bounds(min_connections: usize, max_connections: usize) -> Result<(), String> {
    if max_connections == 0 {
        return Err(format!(
            "max_connections must be greater than 0, got {}",
            max_connections
        ));
    }
    if min_connections > max_connections {
        return Err(format!(
            "min_connections ({}) cannot exceed max_connections ({})",
            min_connections, max_connections
        ));
    }
    Ok(())
}

/// Unchecked wire form of [`PoolConfig`]
#[derive(Deserialize)]
struct PoolConfigFields {
    min_connections: usize,
    max_connections: usize,
    connection_timeout_ms: u64,
    max_connection_age_ms: u64,
    shutdown_timeout_ms: u64,
    close_timeout_ms: u64,
}

impl TryFrom<PoolConfigFields> for PoolConfig {
    type Error = String;

    fn try_from(fields: PoolConfigFields) -> Result<Self, Self::Error> {
        check_bounds(fields.min_connections, fields.max_connections)?;
        Ok(Self {
            min_connections: fields.min_connections,
            max_connections: fields.max_connections,
            connection_timeout_ms: fields.connection_timeout_ms,
            max_connection_age_ms: fields.max_connection_age_ms,
            shutdown_timeout_ms: fields.shutdown_timeout_ms,
            close_timeout_ms: fields.close_timeout_ms,
        })
    }
}
