//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a pool's counters and gauges
///
/// Counters only ever grow. Once nothing is being opened or health checked,
/// `total_created - total_destroyed == current_active + pool_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections opened successfully
    pub total_created: u64,
    /// Connections destroyed (released unhealthy, expired, failed a ping, shut down)
    pub total_destroyed: u64,
    /// Successful acquires
    pub total_borrowed: u64,
    /// Releases that put the connection back into the idle set
    pub total_returned: u64,
    /// Completed health-check passes
    pub total_health_checks: u64,
    /// Query retries performed by the manager
    pub total_retries: u64,
    /// Connections currently borrowed
    pub current_active: usize,
    /// Connections currently idle
    pub pool_size: usize,
    /// Live connections, including ones being opened or health checked
    pub total_connections: usize,
    /// Callers currently waiting for capacity
    pub waiting: usize,
    pub max_connections: usize,
    pub min_connections: usize,
}

impl PoolStats {
    /// Calculate pool utilization as a fraction (0.0 to 1.0) of the maximum size
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.current_active as f64 / self.max_connections as f64
        }
    }

    /// Check if every permitted connection is borrowed
    pub fn is_full(&self) -> bool {
        self.max_connections > 0 && self.current_active >= self.max_connections
    }

    /// Fold another pool's snapshot into this one
    ///
    /// Counters and gauges add up; the configured bounds are per pool and
    /// are left as they are.
    pub fn merge(&mut self, other: &PoolStats) {
        self.total_created += other.total_created;
        self.total_destroyed += other.total_destroyed;
        self.total_borrowed += other.total_borrowed;
        self.total_returned += other.total_returned;
        self.total_health_checks += other.total_health_checks;
        self.total_retries += other.total_retries;
        self.current_active += other.current_active;
        self.pool_size += other.pool_size;
        self.total_connections += other.total_connections;
        self.waiting += other.waiting;
    }
}
