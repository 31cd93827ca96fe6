//! Mapping raw driver failures onto error kinds

use sqlpool_core::DriverError;

use crate::error::ErrorKind;

/// Turns a raw driver failure into an [`ErrorKind`]
///
/// Implemented by [`DefaultClassifier`] and by any
/// `Fn(&DriverError) -> ErrorKind`, so a backend with its own error codes
/// can plug in a closure.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &DriverError) -> ErrorKind;
}

/// The built-in classifier, see [`classify`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &DriverError) -> ErrorKind {
        classify(error)
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&DriverError) -> ErrorKind + Send + Sync,
{
    fn classify(&self, error: &DriverError) -> ErrorKind {
        self(error)
    }
}

const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out"];

const NETWORK_KEYWORDS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection failed",
    "connection error",
    "connection aborted",
    "connection lost",
    "network",
    "unreachable",
    "broken pipe",
    "temporary failure",
    "service unavailable",
    "server error",
    "retry",
    "throttled",
    "rate limit",
    "too many requests",
];

/// HTTP statuses that show up bare inside client error messages
const NETWORK_STATUS_TOKENS: &[&str] = &["500", "502", "503", "504"];

const PERMISSION_KEYWORDS: &[&str] = &[
    "permission denied",
    "insufficient privilege",
    "not authorized",
    "access denied",
    "authentication failed",
    "incorrect username or password",
];

const SYNTAX_KEYWORDS: &[&str] = &["syntax error", "sql compilation error"];

/// Classify a raw driver failure.
///
/// Tagged variants decide first. Query errors are then judged by their
/// SQLSTATE or vendor code, and only then by message keywords, checked in
/// the order timeout, network, permission, syntax. Anything unmatched is
/// [`ErrorKind::Unknown`].
pub fn classify(error: &DriverError) -> ErrorKind {
    match error {
        DriverError::Timeout(_) => ErrorKind::Timeout,
        DriverError::Authentication(_) => ErrorKind::Permission,
        DriverError::Closed => ErrorKind::Network,
        DriverError::Connection(message) => match classify_message(message) {
            Some(ErrorKind::Timeout) => ErrorKind::Timeout,
            _ => ErrorKind::Network,
        },
        DriverError::Io(err) => match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Network,
        },
        DriverError::Http { status, message } => classify_status(*status)
            .or_else(|| classify_message(message))
            .unwrap_or(ErrorKind::Unknown),
        DriverError::Query { code, message } => code
            .as_deref()
            .and_then(classify_code)
            .or_else(|| classify_message(message))
            .unwrap_or(ErrorKind::Unknown),
        DriverError::Other(message) => classify_message(message).unwrap_or(ErrorKind::Unknown),
    }
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Permission),
        408 | 504 => Some(ErrorKind::Timeout),
        429 | 500..=599 => Some(ErrorKind::Network),
        _ => None,
    }
}

/// SQLSTATE classes plus the warehouse's own numeric codes
fn classify_code(code: &str) -> Option<ErrorKind> {
    match code {
        "42501" => Some(ErrorKind::Permission),
        "57014" => Some(ErrorKind::Timeout),
        // Statement reached its timeout and was canceled
        "000630" => Some(ErrorKind::Timeout),
        "390100" | "390144" => Some(ErrorKind::Permission),
        "001003" => Some(ErrorKind::Syntax),
        _ if code.starts_with("28") && code.len() == 5 => Some(ErrorKind::Permission),
        _ if code.starts_with("42") && code.len() == 5 => Some(ErrorKind::Syntax),
        _ if code.starts_with("08") && code.len() == 5 => Some(ErrorKind::Network),
        _ => None,
    }
}

fn classify_message(message: &str) -> Option<ErrorKind> {
    let message = message.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| message.contains(k));

    if contains_any(TIMEOUT_KEYWORDS) {
        Some(ErrorKind::Timeout)
    } else if contains_any(NETWORK_KEYWORDS) || has_status_token(&message) {
        Some(ErrorKind::Network)
    } else if contains_any(PERMISSION_KEYWORDS) {
        Some(ErrorKind::Permission)
    } else if contains_any(SYNTAX_KEYWORDS) {
        Some(ErrorKind::Syntax)
    } else {
        None
    }
}

fn has_status_token(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| NETWORK_STATUS_TOKENS.contains(&token))
}
