//! Connection ping implementation
//!
//! Provides a bounded liveness check that measures round-trip time.

use std::time::{Duration, Instant};

use sqlpool_core::Connection;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    /// The connection is closed
    ConnectionClosed,
    /// The ping round trip failed
    Failed(String),
    /// Ping did not complete within the timeout
    Timeout(Duration),
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::ConnectionClosed => write!(f, "Connection is closed"),
            PingError::Failed(msg) => write!(f, "Ping failed: {}", msg),
            PingError::Timeout(timeout) => write!(f, "Ping timed out after {:?}", timeout),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a connection to check if it's alive.
///
/// Delegates to [`Connection::ping`] and returns the round-trip time. The
/// call never outlives `timeout`.
///
/// # Example
///
/// ```ignore
/// use sqlpool_connection::health::ping_connection;
///
/// let latency = ping_connection(&*conn, Duration::from_secs(5)).await?;
/// println!("Warehouse latency: {:?}", latency);
/// ```
pub async fn ping_connection(conn: &dyn Connection, timeout: Duration) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.ping()).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::Failed(e.to_string())),
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}
