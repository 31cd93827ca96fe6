//! sqlpool integration test suite
//!
//! Exercises the pool, health checker, retry policy and manager through
//! their public API against an in-memory scripted backend. Each test
//! scripts the replies the backend gives, so retry and failure paths run
//! deterministically without a live warehouse.
//!
//! # Test Categories
//!
//! - Pool bounds, reuse, and statistics under concurrent load
//! - Backoff bounds and retry eligibility
//! - Health-check eviction and refill
//! - Manager execution: retries, classification, timeouts, shutdown
//! - Configuration loading
//!
//! # Usage
//!
//! ```bash
//! cargo test -p sqlpool-pool-tests
//!
//! # With pool logs
//! RUST_LOG=sqlpool_connection=trace cargo test -p sqlpool-pool-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fixtures;

#[cfg(test)]
mod config_tests;

#[cfg(test)]
mod health_tests;

#[cfg(test)]
mod manager_tests;

#[cfg(test)]
mod pool_tests;

#[cfg(test)]
mod retry_tests;
