//! Error types reported by backend connections

use thiserror::Error;

/// Raw failure reported by a backend connection or factory
///
/// Variants carry what the backend client observed. Turning this into a
/// retry decision is the pool's job, not the driver's.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {message}")]
    Query {
        /// SQLSTATE or vendor error code, when the backend reports one
        code: Option<String>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Build a query error with a SQLSTATE or vendor code
    pub fn query_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::Query {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Build a query error without a code
    pub fn query(message: impl Into<String>) -> Self {
        DriverError::Query {
            code: None,
            message: message.into(),
        }
    }

    /// The error code reported by the backend, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            DriverError::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, DriverError>;
