//! Common error types for Scout

use thiserror::Error;

/// Common result type for Scout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Scout crates
#[derive(Error, Debug)]
pub enum Error {
    /// Registry store operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External HTTP service error (status code when one was received)
    #[error("HTTP error{}: {message}", .status.map(|s| format!(" {}", s)).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// Message (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External call exceeded its deadline
    #[error("Timed out after {limit:?}: {operation}")]
    Timeout {
        operation: String,
        limit: std::time::Duration,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry of the same call has a chance of succeeding
    ///
    /// Timeouts, connection failures, 429 and 5xx responses are transient;
    /// everything else (4xx, bad payloads, config) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Http { status: None, .. } => true,
            Error::Http { status: Some(code), .. } => *code == 429 || *code >= 500,
            Error::Database(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let rate_limited = Error::Http { status: Some(429), message: "slow down".into() };
        let server = Error::Http { status: Some(503), message: "unavailable".into() };
        let client = Error::Http { status: Some(404), message: "missing".into() };
        let connect = Error::Http { status: None, message: "connection refused".into() };

        assert!(rate_limited.is_transient());
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(connect.is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_http_error_display() {
        let err = Error::Http { status: Some(502), message: "bad gateway".into() };
        assert_eq!(err.to_string(), "HTTP error 502: bad gateway");

        let err = Error::Http { status: None, message: "dns".into() };
        assert_eq!(err.to_string(), "HTTP error: dns");
    }
}
