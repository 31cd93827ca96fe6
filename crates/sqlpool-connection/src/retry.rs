//! Retry decisions for pooled query execution
//!
//! This module provides the backoff policy and the classifier that turns a
//! raw driver failure into an [`ErrorKind`](crate::ErrorKind).
//!
//! # Example
//!
//! ```ignore
//! use sqlpool_connection::retry::{classify, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let kind = classify(&error);
//! if policy.should_retry(kind, attempt) {
//!     tokio::time::sleep(policy.delay_for(attempt)).await;
//! }
//! ```

mod backoff;
mod classify;

#[cfg(test)]
mod tests;

pub use backoff::RetryPolicy;
pub use classify::{DefaultClassifier, ErrorClassifier, classify};
