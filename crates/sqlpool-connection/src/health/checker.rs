//! Health checker with periodic checking functionality
//!
//! Periodically detaches a pool's idle connections, evicts the ones that
//! are too old or fail a ping, and tops the pool back up to its minimum.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ping::ping_connection;
use super::status::HealthStatus;
use crate::pool::{FAR_FUTURE, PoolShared, deadline_after};

/// Configuration for health checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Interval between health-check passes
    pub check_interval: Duration,
    /// Timeout for each ping operation
    pub ping_timeout: Duration,
}

impl HealthCheckConfig {
    /// Create a new health check configuration.
    pub fn new(interval: Duration) -> Self {
        Self {
            check_interval: interval,
            ping_timeout: Duration::from_secs(5),
        }
    }

    /// Set ping timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Lifecycle of the background checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCheckerState {
    Running,
    /// Stop requested; the current pass (if any) is finishing
    Stopping,
    Stopped,
}

/// What a single health-check pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckReport {
    /// Idle connections detached for checking
    pub checked: usize,
    /// Connections destroyed for reaching `max_connection_age`
    pub expired: usize,
    /// Connections destroyed after a failed ping
    pub failed: usize,
    /// Connections that passed and went back to the idle set
    pub healthy: usize,
    /// Connections opened to get back to `min_connections`
    pub created: usize,
}

impl HealthCheckReport {
    /// Connections removed by this pass
    pub fn evicted(&self) -> usize {
        self.expired + self.failed
    }
}

/// Run one health-check pass over the pool's idle set.
///
/// Connections are detached while they are checked, so `acquire` never
/// sees a connection in the middle of a ping, and the pool lock is never
/// held across I/O.
pub(crate) async fn run_pass(pool: &PoolShared, ping_timeout: Duration) -> HealthCheckReport {
    let max_age = pool.config.max_connection_age();
    let detached = pool.detach_idle();
    let mut report = HealthCheckReport {
        checked: detached.len(),
        ..HealthCheckReport::default()
    };

    for mut conn in detached {
        let Some(entry) = conn.entry_mut() else {
            continue;
        };
        let connection_id = entry.id;

        if entry.is_expired(max_age) {
            tracing::trace!(connection_id, "evicting expired idle connection");
            report.expired += 1;
            conn.finish(false).await;
            continue;
        }

        let result = ping_connection(entry.handle.as_ref(), ping_timeout).await;
        let alive = result.is_ok();
        entry.status = HealthStatus::from_ping(&result);
        if alive {
            entry.touch();
        }

        match &result {
            Ok(latency) => {
                report.healthy += 1;
                tracing::trace!(
                    connection_id,
                    latency_ms = latency.as_millis() as u64,
                    "idle connection healthy"
                );
            }
            Err(error) => {
                report.failed += 1;
                tracing::debug!(
                    connection_id,
                    error = %error,
                    "evicting idle connection that failed its ping"
                );
            }
        }
        conn.finish(alive).await;
    }

    report.created = pool.refill().await;
    pool.record_health_check();

    if report.evicted() > 0 || report.created > 0 {
        tracing::info!(
            target_name = %pool.target,
            checked = report.checked,
            expired = report.expired,
            failed = report.failed,
            created = report.created,
            "health check evicted or replaced connections"
        );
    } else {
        tracing::debug!(
            target_name = %pool.target,
            checked = report.checked,
            "health check complete"
        );
    }

    report
}

/// Background health checker for one pool.
pub(crate) struct HealthChecker {
    pool: Arc<PoolShared>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub(crate) fn new(pool: Arc<PoolShared>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Starts the health checker task.
    pub(crate) fn spawn(self) -> HealthCheckHandle {
        let (state_tx, state_rx) = watch::channel(HealthCheckerState::Running);
        let join = tokio::spawn(self.run(state_rx));
        HealthCheckHandle {
            state: state_tx,
            join: Some(join),
        }
    }

    /// Main health check loop
    ///
    /// The stop signal is only looked at between passes; a pass that has
    /// started always runs to completion.
    async fn run(self, mut state: watch::Receiver<HealthCheckerState>) {
        let period = self
            .config
            .check_interval
            .clamp(Duration::from_millis(1), FAR_FUTURE);
        let mut interval = tokio::time::interval_at(deadline_after(period), period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            target_name = %self.pool.target,
            interval_ms = period.as_millis() as u64,
            "health checker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if *state.borrow() != HealthCheckerState::Running {
                break;
            }

            run_pass(&self.pool, self.config.ping_timeout).await;
        }

        tracing::debug!(target_name = %self.pool.target, "health checker stopped");
    }
}

/// Handle to a running health checker
///
/// Dropping the handle also stops the task at its next wakeup.
pub struct HealthCheckHandle {
    state: watch::Sender<HealthCheckerState>,
    join: Option<JoinHandle<()>>,
}

impl HealthCheckHandle {
    /// Current lifecycle state
    pub fn state(&self) -> HealthCheckerState {
        *self.state.borrow()
    }

    /// Ask the task to stop and wait up to `timeout` for it to exit
    ///
    /// If the task does not finish in time it is aborted.
    pub async fn stop(&mut self, timeout: Duration) {
        let Some(mut join) = self.join.take() else {
            return;
        };
        self.state.send_replace(HealthCheckerState::Stopping);

        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "health checker task failed");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "health checker did not stop in time, aborting"
                );
                join.abort();
            }
        }

        self.state.send_replace(HealthCheckerState::Stopped);
    }
}

impl std::fmt::Debug for HealthCheckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckHandle")
            .field("state", &self.state())
            .finish()
    }
}
