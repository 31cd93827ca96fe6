//! Exponential backoff with jitter for query retries

use std::time::Duration;

use rand::Rng;

use crate::error::ErrorKind;

/// Retry policy for failed queries.
///
/// Decides whether a classified failure is retried and how long to wait
/// first. Delays grow exponentially from `base_delay`; up to
/// `jitter_fraction` of the delay is added at random so concurrent callers
/// do not retry in lockstep.
///
/// # Example
///
/// ```
/// use sqlpool_connection::{ErrorKind, retry::RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100)).with_jitter_fraction(0.0);
///
/// assert!(policy.should_retry(ErrorKind::Network, 0));
/// assert!(!policy.should_retry(ErrorKind::Syntax, 0));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    max_retries: u32,
    /// Delay before the first retry, before jitter
    base_delay: Duration,
    /// Growth factor per attempt (default: 2.0)
    backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay
    jitter_fraction: f64,
}

impl RetryPolicy {
    /// Create a policy with the default multiplier (2.0) and jitter (10%).
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }

    /// Set the multiplier for exponential growth.
    ///
    /// Values below 1.0 are raised to 1.0 so delays never shrink.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Set the jitter fraction, clamped to `[0.0, 1.0]`.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Whether a failure of `kind` on zero-based `attempt` gets another try.
    ///
    /// Only network, timeout and unclassified failures are retried, and
    /// only while `attempt < max_retries`.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_retries
    }

    /// Delay before retrying after failed `attempt`, without jitter.
    ///
    /// `base_delay * multiplier^attempt`, saturating at `Duration::MAX`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powf(attempt as f64);
        nanos_to_duration(nanos)
    }

    /// Delay before retrying after failed `attempt`, jitter included.
    ///
    /// Lies in `[base, base * (1 + jitter_fraction)]`; the jitter is drawn
    /// from the thread-local RNG on every call.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter_fraction <= 0.0 || base.is_zero() || base == Duration::MAX {
            return base;
        }

        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_fraction);
        nanos_to_duration(base.as_nanos() as f64 * (1.0 + jitter))
    }

    /// Get the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Get the multiplier.
    pub fn multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Get the jitter fraction.
    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }
}

impl Default for RetryPolicy {
    /// Default policy: 3 retries, 1 second base delay, 2x multiplier, 10% jitter
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

fn nanos_to_duration(nanos: f64) -> Duration {
    if nanos.is_nan() || nanos <= 0.0 {
        Duration::ZERO
    } else if nanos >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_nanos(nanos as u64)
    }
}
