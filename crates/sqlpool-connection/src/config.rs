//! Manager configuration
//!
//! Loaded from TOML, optionally overridden from `SQLPOOL_*` environment
//! variables, and validated before a [`PoolManager`](crate::PoolManager)
//! is built from it.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::health::HealthCheckConfig;
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;

/// Prefix of the environment variables read by [`ManagerConfig::from_env`]
pub const ENV_PREFIX: &str = "SQLPOOL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub connection_timeout_ms: u64,
    pub max_connection_age_ms: u64,
    pub health_check_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
    pub jitter_fraction: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            min_connections: 2,
            connection_timeout_ms: 60_000,
            max_connection_age_ms: 3_600_000,
            health_check_interval_ms: 300_000,
            ping_timeout_ms: 5_000,
            shutdown_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_backoff: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl ManagerConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded pool configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SQLPOOL_<FIELD>` overrides read through `lookup`.
    ///
    /// `lookup` receives the full variable name, e.g.
    /// `SQLPOOL_MAX_CONNECTIONS`. Values that fail to parse are reported
    /// rather than ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_field(&lookup, "max_connections", &mut self.max_connections)?;
        override_field(&lookup, "min_connections", &mut self.min_connections)?;
        override_field(&lookup, "connection_timeout_ms", &mut self.connection_timeout_ms)?;
        override_field(&lookup, "max_connection_age_ms", &mut self.max_connection_age_ms)?;
        override_field(
            &lookup,
            "health_check_interval_ms",
            &mut self.health_check_interval_ms,
        )?;
        override_field(&lookup, "ping_timeout_ms", &mut self.ping_timeout_ms)?;
        override_field(&lookup, "shutdown_timeout_ms", &mut self.shutdown_timeout_ms)?;
        override_field(&lookup, "close_timeout_ms", &mut self.close_timeout_ms)?;
        override_field(&lookup, "max_retries", &mut self.max_retries)?;
        override_field(&lookup, "retry_delay_ms", &mut self.retry_delay_ms)?;
        override_field(&lookup, "retry_backoff", &mut self.retry_backoff)?;
        override_field(&lookup, "jitter_fraction", &mut self.jitter_fraction)?;
        Ok(self)
    }

    /// Check the values are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be greater than 0"));
        }
        if self.min_connections > self.max_connections {
            return Err(invalid(
                "min_connections",
                format!(
                    "{} exceeds max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        if self.health_check_interval_ms == 0 {
            return Err(invalid("health_check_interval_ms", "must be greater than 0"));
        }
        if !self.retry_backoff.is_finite() || self.retry_backoff < 1.0 {
            return Err(invalid("retry_backoff", "must be a finite number >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(invalid("jitter_fraction", "must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: usize) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age_ms = duration_ms(age);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: f64) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_connection_age(&self) -> Duration {
        Duration::from_millis(self.max_connection_age_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-target pool settings
    ///
    /// # Panics
    ///
    /// Panics on sizes that [`validate`](Self::validate) rejects.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.min_connections, self.max_connections)
            .with_connection_timeout_ms(self.connection_timeout_ms)
            .with_max_connection_age_ms(self.max_connection_age_ms)
            .with_shutdown_timeout_ms(self.shutdown_timeout_ms)
            .with_close_timeout_ms(self.close_timeout_ms)
    }

    pub fn health_check_config(&self) -> HealthCheckConfig {
        HealthCheckConfig::new(self.health_check_interval()).with_ping_timeout(self.ping_timeout())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay())
            .with_multiplier(self.retry_backoff)
            .with_jitter_fraction(self.jitter_fraction)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn override_field<T, F>(lookup: &F, field: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{}{}", ENV_PREFIX, field.to_uppercase());
    if let Some(raw) = lookup(&key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(&key, format!("{:?}: {}", raw, e)))?;
        tracing::debug!(key = %key, "configuration overridden from environment");
    }
    Ok(())
}
