//! Health checking for pooled connections
//!
//! This module provides the ping primitive, the per-connection health
//! status, and the background task that keeps a pool's idle set fresh.
//!
//! # Example
//!
//! ```ignore
//! use sqlpool_connection::health::{ping_connection, HealthCheckConfig};
//!
//! // One-time liveness check
//! let latency = ping_connection(&*conn, Duration::from_secs(5)).await?;
//!
//! // Periodic health checking of a pool's idle connections
//! pool.start_health_checker(HealthCheckConfig::new(Duration::from_secs(300)));
//! ```

mod checker;
mod ping;
mod status;


pub use checker::{HealthCheckConfig, HealthCheckHandle, HealthCheckReport, HealthCheckerState};
pub use ping::{PingError, PingResult, ping_connection};
pub use status::HealthStatus;

pub(crate) use checker::{HealthChecker, run_pass};
