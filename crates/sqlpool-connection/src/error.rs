//! Error taxonomy for pooled execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified kind of a failure
///
/// Query-level kinds come out of [`classify`](crate::retry::classify);
/// the pool-level kinds are produced by the pool itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-level failure (reset, refused, unreachable, 5xx, throttling)
    Network,
    /// The backend or the client deadline timed out
    Timeout,
    /// Authentication or authorization failure
    Permission,
    /// The statement was rejected by the compiler
    Syntax,
    /// Anything the classifier does not recognise
    Unknown,
    /// No pool capacity within the acquire deadline
    PoolTimeout,
    /// Opening a new backend connection failed
    ConnectionCreate,
    /// The pool was closed
    PoolClosed,
    /// The request was rejected before touching the pool
    InvalidInput,
}

impl ErrorKind {
    /// Whether a query failure of this kind may be retried on a fresh connection
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }

    /// Whether this kind is produced by the pool rather than the backend
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::PoolTimeout | ErrorKind::ConnectionCreate | ErrorKind::PoolClosed
        )
    }

    /// Stable lowercase name used in logs and serialized outcomes
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Unknown => "unknown",
            ErrorKind::PoolTimeout => "pool_timeout",
            ErrorKind::ConnectionCreate => "connection_create",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the pool while acquiring connections
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Timed out waiting for connection to {target} (timeout: {timeout:?})")]
    Timeout {
        target: String,
        timeout: std::time::Duration,
    },

    #[error("Failed to create connection to {target}: {source}")]
    ConnectionCreate {
        target: String,
        #[source]
        source: sqlpool_core::DriverError,
    },

    #[error("Pool for {0} is closed")]
    Closed(String),
}

impl PoolError {
    /// The error kind this pool failure surfaces as
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Timeout { .. } => ErrorKind::PoolTimeout,
            PoolError::ConnectionCreate { .. } => ErrorKind::ConnectionCreate,
            PoolError::Closed(_) => ErrorKind::PoolClosed,
        }
    }
}

/// Terminal failure of a pooled execution
///
/// Carries the classified kind and the original message, plus the number
/// of attempts made before giving up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error after {attempts} attempt(s): {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
