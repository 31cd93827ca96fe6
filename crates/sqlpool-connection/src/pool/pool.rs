//! Connection pool implementation

use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlpool_core::{Connection, ConnectionFactory, DriverError};
use tokio::sync::Notify;

use super::config::PoolConfig;
use super::stats::PoolStats;
use crate::error::{PoolError, Result};
use crate::health::{
    HealthCheckConfig, HealthCheckHandle, HealthCheckReport, HealthChecker, HealthCheckerState,
    HealthStatus,
};

/// A backend handle plus the metadata the pool tracks for it
pub(crate) struct ConnectionEntry {
    pub(crate) id: u64,
    pub(crate) handle: Box<dyn Connection>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    pub(crate) use_count: u64,
    pub(crate) status: HealthStatus,
}

impl ConnectionEntry {
    fn new(id: u64, handle: Box<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            id,
            handle,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            status: HealthStatus::Unknown,
        }
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_expired(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    fn mark_borrowed(&mut self) {
        self.touch();
        self.use_count += 1;
    }
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    destroyed: u64,
    borrowed: u64,
    returned: u64,
    health_checks: u64,
    retries: u64,
}

/// Everything guarded by the pool lock
#[derive(Default)]
struct PoolState {
    idle: VecDeque<ConnectionEntry>,
    /// Ids of connections currently lent out
    borrowed: HashSet<u64>,
    /// Slots reserved for connections being opened
    opening: usize,
    /// Connections detached from the idle set by a health check
    checking: usize,
    waiting: usize,
    closed: bool,
    counters: Counters,
}

impl PoolState {
    /// Connections counted against `max_connections`
    fn live(&self) -> usize {
        self.idle.len() + self.borrowed.len() + self.opening + self.checking
    }
}

/// State shared between the pool handle, borrowed connections and the
/// health-check task
pub(crate) struct PoolShared {
    pub(crate) target: String,
    pub(crate) config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    /// Signaled whenever capacity, the idle set or the borrowed set changes
    state_changed: Notify,
    next_id: AtomicU64,
}

/// Keeps a slot reserved in `opening` until the new connection is
/// registered or the attempt is abandoned
struct Reservation<'a> {
    pool: &'a PoolShared,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a PoolShared) -> Self {
        Self { pool, armed: true }
    }

    fn complete(mut self, state: &mut PoolState) {
        state.opening -= 1;
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().opening -= 1;
            self.pool.state_changed.notify_waiters();
        }
    }
}

/// Counts a caller in `waiting` for as long as it is parked in `acquire`
struct WaitingGuard<'a> {
    pool: &'a PoolShared,
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.pool.state.lock().waiting -= 1;
    }
}

/// A connection detached from the idle set for a health check
///
/// Dropping it without `finish` destroys the connection, so an interrupted
/// check never leaks a slot.
pub(crate) struct Detached<'a> {
    pool: &'a PoolShared,
    entry: Option<ConnectionEntry>,
}

impl Detached<'_> {
    /// The connection under check; `None` only once `finish` has run,
    /// which consumes the guard
    pub(crate) fn entry_mut(&mut self) -> Option<&mut ConnectionEntry> {
        self.entry.as_mut()
    }

    /// Return the connection to the idle set or destroy it
    pub(crate) async fn finish(mut self, alive: bool) {
        if let Some(entry) = self.entry.take() {
            if let Some(dead) = self.pool.reattach(entry, alive) {
                close_entry(dead, self.pool.config.close_timeout()).await;
            }
        }
    }
}

impl Drop for Detached<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Some(dead) = self.pool.reattach(entry, false) {
                spawn_close(dead, self.pool.config.close_timeout());
            }
        }
    }
}

enum Next {
    Ready(ConnectionEntry),
    Discard(ConnectionEntry),
    Open,
    Wait,
    Closed,
}

enum Released {
    Returned,
    Destroy(ConnectionEntry, &'static str),
    Orphaned(ConnectionEntry),
}

impl PoolShared {
    fn pool_closed(&self) -> PoolError {
        PoolError::Closed(self.target.clone())
    }

    async fn open_entry(&self) -> std::result::Result<ConnectionEntry, DriverError> {
        let handle = self.factory.connect(&self.target).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ConnectionEntry::new(id, handle))
    }

    async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection> {
        let deadline = deadline_after(timeout);
        let max_age = self.config.max_connection_age();
        let mut waiting: Option<WaitingGuard<'_>> = None;

        loop {
            // Registered before inspecting state so a release between the
            // check and the wait is not missed.
            let notified = self.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.state.lock();
                if state.closed {
                    Next::Closed
                } else if let Some(entry) = state.idle.pop_front() {
                    if entry.is_expired(max_age) || entry.handle.is_closed() {
                        state.counters.destroyed += 1;
                        Next::Discard(entry)
                    } else {
                        state.borrowed.insert(entry.id);
                        state.counters.borrowed += 1;
                        Next::Ready(entry)
                    }
                } else if state.live() < self.config.max_connections() {
                    state.opening += 1;
                    Next::Open
                } else {
                    if waiting.is_none() {
                        state.waiting += 1;
                        waiting = Some(WaitingGuard { pool: self });
                    }
                    Next::Wait
                }
            };

            match next {
                Next::Closed => return Err(self.pool_closed()),
                Next::Ready(mut entry) => {
                    entry.mark_borrowed();
                    tracing::trace!(
                        target_name = %self.target,
                        connection_id = entry.id,
                        "reusing idle connection"
                    );
                    return Ok(PooledConnection::new(entry, self.clone()));
                }
                Next::Discard(entry) => {
                    tracing::debug!(
                        target_name = %self.target,
                        connection_id = entry.id,
                        age_ms = entry.age().as_millis() as u64,
                        "discarding expired idle connection"
                    );
                    self.state_changed.notify_waiters();
                    spawn_close(entry, self.config.close_timeout());
                }
                Next::Open => {
                    let reservation = Reservation::new(self);
                    let opened = match tokio::time::timeout_at(deadline, self.open_entry()).await {
                        Ok(result) => result,
                        Err(_) => Err(DriverError::Timeout(format!(
                            "connect did not finish within {:?}",
                            timeout
                        ))),
                    };

                    let mut entry = match opened {
                        Ok(entry) => entry,
                        Err(source) => {
                            drop(reservation);
                            tracing::warn!(
                                target_name = %self.target,
                                error = %source,
                                "failed to create connection"
                            );
                            return Err(PoolError::ConnectionCreate {
                                target: self.target.clone(),
                                source,
                            });
                        }
                    };

                    let closed = {
                        let mut state = self.state.lock();
                        reservation.complete(&mut state);
                        state.counters.created += 1;
                        if state.closed {
                            state.counters.destroyed += 1;
                            true
                        } else {
                            state.borrowed.insert(entry.id);
                            state.counters.borrowed += 1;
                            false
                        }
                    };

                    if closed {
                        self.state_changed.notify_waiters();
                        close_entry(entry, self.config.close_timeout()).await;
                        return Err(self.pool_closed());
                    }

                    entry.mark_borrowed();
                    tracing::debug!(
                        target_name = %self.target,
                        connection_id = entry.id,
                        "created new connection"
                    );
                    return Ok(PooledConnection::new(entry, self.clone()));
                }
                Next::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::Timeout {
                            target: self.target.clone(),
                            timeout,
                        });
                    }
                }
            }
        }
    }

    /// Bookkeeping half of a release; returns what must happen to the handle
    fn settle(&self, entry: ConnectionEntry, healthy: bool) -> Released {
        let max_age = self.config.max_connection_age();
        let released = {
            let mut state = self.state.lock();
            if !state.borrowed.remove(&entry.id) {
                // Already written off by a forced shutdown
                Released::Orphaned(entry)
            } else if !healthy {
                state.counters.destroyed += 1;
                Released::Destroy(entry, "released unhealthy")
            } else if state.closed {
                state.counters.destroyed += 1;
                Released::Destroy(entry, "pool closed")
            } else if entry.is_expired(max_age) {
                state.counters.destroyed += 1;
                Released::Destroy(entry, "max age reached")
            } else if entry.handle.is_closed() {
                state.counters.destroyed += 1;
                Released::Destroy(entry, "handle closed")
            } else {
                state.idle.push_back(entry);
                state.counters.returned += 1;
                Released::Returned
            }
        };
        self.state_changed.notify_waiters();
        released
    }

    /// Settle a returned connection; any handle to close goes to a
    /// background task so the caller never waits on the backend
    fn release(&self, entry: ConnectionEntry, healthy: bool) {
        match self.settle(entry, healthy) {
            Released::Returned => {}
            Released::Destroy(entry, reason) => {
                tracing::debug!(
                    target_name = %self.target,
                    connection_id = entry.id,
                    reason,
                    "destroying connection on release"
                );
                spawn_close(entry, self.config.close_timeout());
            }
            Released::Orphaned(entry) => {
                spawn_close(entry, self.config.close_timeout());
            }
        }
    }

    /// Release path for a connection dropped without an explicit release
    fn release_dropped(&self, entry: ConnectionEntry) {
        match self.settle(entry, false) {
            Released::Returned => {}
            Released::Destroy(entry, _) | Released::Orphaned(entry) => {
                tracing::debug!(
                    target_name = %self.target,
                    connection_id = entry.id,
                    "connection dropped without release, destroying"
                );
                spawn_close(entry, self.config.close_timeout());
            }
        }
    }

    /// Take every idle connection out of circulation for a health check
    pub(crate) fn detach_idle(&self) -> Vec<Detached<'_>> {
        let mut state = self.state.lock();
        let entries: Vec<_> = state.idle.drain(..).collect();
        state.checking += entries.len();
        entries
            .into_iter()
            .map(|entry| Detached {
                pool: self,
                entry: Some(entry),
            })
            .collect()
    }

    /// Put a detached connection back, or hand it back for destruction
    fn reattach(&self, entry: ConnectionEntry, alive: bool) -> Option<ConnectionEntry> {
        let dead = {
            let mut state = self.state.lock();
            state.checking -= 1;
            if alive && !state.closed {
                state.idle.push_back(entry);
                None
            } else {
                state.counters.destroyed += 1;
                Some(entry)
            }
        };
        self.state_changed.notify_waiters();
        dead
    }

    /// Open connections until the pool holds at least `min_connections`
    ///
    /// Best effort: creation failures are logged and the rest of the batch
    /// is still attempted. Returns how many connections were added.
    pub(crate) async fn refill(&self) -> usize {
        let needed = {
            let mut state = self.state.lock();
            if state.closed {
                0
            } else {
                let live = state.live();
                let needed = self
                    .config
                    .min_connections()
                    .saturating_sub(live)
                    .min(self.config.max_connections().saturating_sub(live));
                state.opening += needed;
                needed
            }
        };

        let reservations: Vec<_> = (0..needed).map(|_| Reservation::new(self)).collect();
        let mut created = 0;

        for reservation in reservations {
            let opened =
                match tokio::time::timeout(self.config.connection_timeout(), self.open_entry())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Timeout("connect timed out".into())),
                };

            match opened {
                Ok(entry) => {
                    let dead = {
                        let mut state = self.state.lock();
                        reservation.complete(&mut state);
                        state.counters.created += 1;
                        if state.closed {
                            state.counters.destroyed += 1;
                            Some(entry)
                        } else {
                            state.idle.push_back(entry);
                            created += 1;
                            None
                        }
                    };
                    self.state_changed.notify_waiters();
                    if let Some(entry) = dead {
                        close_entry(entry, self.config.close_timeout()).await;
                    }
                }
                Err(error) => {
                    drop(reservation);
                    tracing::warn!(
                        target_name = %self.target,
                        error = %error,
                        "failed to open connection while refilling pool"
                    );
                }
            }
        }

        created
    }

    pub(crate) fn record_health_check(&self) {
        self.state.lock().counters.health_checks += 1;
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let counters = &state.counters;
        PoolStats {
            total_created: counters.created,
            total_destroyed: counters.destroyed,
            total_borrowed: counters.borrowed,
            total_returned: counters.returned,
            total_health_checks: counters.health_checks,
            total_retries: counters.retries,
            current_active: state.borrowed.len(),
            pool_size: state.idle.len(),
            total_connections: state.live(),
            waiting: state.waiting,
            max_connections: self.config.max_connections(),
            min_connections: self.config.min_connections(),
        }
    }
}

/// Stand-in deadline for timeouts too large to add to the current instant
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating to [`FAR_FUTURE`] from now
pub(crate) fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Close a backend handle, bounded by `timeout`; failures are only logged
pub(crate) async fn close_entry(entry: ConnectionEntry, timeout: Duration) {
    match tokio::time::timeout(timeout, entry.handle.close()).await {
        Ok(Ok(())) => {
            tracing::trace!(connection_id = entry.id, "connection closed");
        }
        Ok(Err(error)) => {
            tracing::warn!(
                connection_id = entry.id,
                error = %error,
                "error while closing connection"
            );
        }
        Err(_) => {
            tracing::warn!(
                connection_id = entry.id,
                timeout_ms = timeout.as_millis() as u64,
                "timed out closing connection"
            );
        }
    }
}

/// Close a handle in the background when the caller cannot await
fn spawn_close(entry: ConnectionEntry, timeout: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(close_entry(entry, timeout));
        }
        Err(_) => {
            tracing::warn!(
                connection_id = entry.id,
                "no runtime available, dropping connection without close"
            );
        }
    }
}

/// A pool of connections to one target
///
/// All pool state lives behind a single lock. Callers waiting for capacity
/// park on a notification raised by releases, destroys and refills.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    health: Mutex<Option<HealthCheckHandle>>,
}

impl ConnectionPool {
    /// Create a new connection pool for `target`
    ///
    /// No connections are opened until the first acquire or health check.
    pub fn new<F: ConnectionFactory>(
        target: impl Into<String>,
        config: PoolConfig,
        factory: F,
    ) -> Self {
        Self::with_shared_factory(target, config, Arc::new(factory))
    }

    /// Create a pool that shares a factory with other pools
    pub fn with_shared_factory(
        target: impl Into<String>,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                target: target.into(),
                config,
                factory,
                state: Mutex::new(PoolState::default()),
                state_changed: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
            health: Mutex::new(None),
        }
    }

    /// The target this pool connects to
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get a connection using the configured connection timeout
    pub async fn get(&self) -> Result<PooledConnection> {
        self.acquire(self.shared.config.connection_timeout()).await
    }

    /// Borrow a connection from the pool
    ///
    /// This will:
    /// 1. Reuse an idle connection younger than `max_connection_age`
    /// 2. Otherwise open a new one if the pool is below `max_connections`
    /// 3. Otherwise wait for capacity until `timeout` elapses
    ///
    /// Fails with `PoolError::Timeout` when no capacity appears in time and
    /// with `PoolError::ConnectionCreate` when the backend refuses a new
    /// connection (no slot is consumed in that case).
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection> {
        self.shared.acquire(timeout).await
    }

    /// Give a borrowed connection back
    ///
    /// Healthy connections younger than `max_connection_age` return to the
    /// idle set; everything else is destroyed. Never blocks: handles are
    /// closed in the background.
    pub fn release(&self, conn: PooledConnection, healthy: bool) {
        debug_assert!(
            Arc::ptr_eq(&conn.pool, &self.shared),
            "connection released to a different pool"
        );
        conn.release(healthy);
    }

    /// Count a query retry performed against this pool
    pub fn record_retry(&self) {
        self.shared.state.lock().counters.retries += 1;
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Check whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Start the background health checker
    ///
    /// Returns false if one is already running or the pool is closed.
    pub fn start_health_checker(&self, config: HealthCheckConfig) -> bool {
        let mut health = self.health.lock();
        if health.is_some() || self.is_closed() {
            return false;
        }
        *health = Some(HealthChecker::new(self.shared.clone(), config).spawn());
        true
    }

    /// State of the background health checker, if one was started
    pub fn health_checker_state(&self) -> Option<HealthCheckerState> {
        self.health.lock().as_ref().map(HealthCheckHandle::state)
    }

    /// Run one health-check pass now, independent of the background task
    pub async fn run_health_check(&self, ping_timeout: Duration) -> HealthCheckReport {
        crate::health::run_pass(&self.shared, ping_timeout).await
    }

    /// Shut the pool down
    ///
    /// Stops new acquires, stops the health checker, destroys idle
    /// connections and waits up to `shutdown_timeout` for borrowed
    /// connections to come back. Borrows still out after that are written
    /// off; their handles are closed whenever the borrower lets go.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) {
        let first = {
            let mut state = self.shared.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if !first {
            return;
        }
        self.shared.state_changed.notify_waiters();

        let shutdown_timeout = self.shared.config.shutdown_timeout();
        let deadline = deadline_after(shutdown_timeout);

        // Taken out for the await and put back so the final state stays visible
        let health = self.health.lock().take();
        if let Some(mut handle) = health {
            handle.stop(shutdown_timeout).await;
            *self.health.lock() = Some(handle);
        }

        let idle: Vec<_> = {
            let mut state = self.shared.state.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.counters.destroyed += idle.len() as u64;
            idle
        };
        let close_timeout = self.shared.config.close_timeout();
        futures::future::join_all(idle.into_iter().map(|entry| close_entry(entry, close_timeout)))
            .await;

        loop {
            let notified = self.shared.state_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.state.lock().borrowed.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut state = self.shared.state.lock();
                let outstanding = state.borrowed.len();
                state.borrowed.clear();
                state.counters.destroyed += outstanding as u64;
                tracing::warn!(
                    target_name = %self.shared.target,
                    outstanding,
                    "shutdown timeout reached, abandoning borrowed connections"
                );
                break;
            }
        }

        tracing::info!(target_name = %self.shared.target, "connection pool closed");
    }
}

/// A connection borrowed from the pool
///
/// Hand it back with [`release`](Self::release), declaring whether it is
/// still healthy. Dropping it without a release destroys it.
pub struct PooledConnection {
    entry: Option<ConnectionEntry>,
    pool: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(entry: ConnectionEntry, pool: Arc<PoolShared>) -> Self {
        Self {
            entry: Some(entry),
            pool,
        }
    }

    fn entry(&self) -> &ConnectionEntry {
        self.entry.as_ref().expect("connection taken")
    }

    /// Pool-assigned connection id, unique within the pool
    pub fn id(&self) -> u64 {
        self.entry().id
    }

    /// The target this connection belongs to
    pub fn target(&self) -> &str {
        &self.pool.target
    }

    /// When the connection was opened
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    /// Time since the connection was opened
    pub fn age(&self) -> Duration {
        self.entry().age()
    }

    /// When the connection was last borrowed or health checked
    pub fn last_used_at(&self) -> Instant {
        self.entry().last_used_at
    }

    /// How many times the connection has been borrowed
    pub fn use_count(&self) -> u64 {
        self.entry().use_count
    }

    /// Result of the last health check, `Unknown` if never checked
    pub fn status(&self) -> HealthStatus {
        self.entry().status
    }

    /// Give the connection back to its pool
    pub fn release(mut self, healthy: bool) {
        if let Some(entry) = self.entry.take() {
            self.pool.release(entry, healthy);
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.entry().handle.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release_dropped(entry);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PooledConnection");
        debug.field("target", &self.pool.target);
        if let Some(entry) = &self.entry {
            debug
                .field("id", &entry.id)
                .field("driver", &entry.handle.driver_name())
                .field("use_count", &entry.use_count)
                .field("status", &entry.status);
        }
        debug.finish()
    }
}
