//! Error types for pgmux operations.

use std::fmt;

/// The primary error type for all pgmux operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, socket registration)
    Connection(ConnectionError),
    /// Server-reported or scheduler-imposed transaction failures
    Transaction(TransactionError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// The admission queue is at capacity
    QueueFull {
        /// Configured queue capacity in statements
        capacity: usize,
    },
    /// The worker thread is gone
    Shutdown,
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
}

#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
    /// Server error code (SQLSTATE) when the server reported one
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// The server rejected a statement
    Server,
    /// Forcibly stopped by the driver
    Stopped,
    /// Discarded by retry policy
    Dropped,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// A pool for this role already exists
    AlreadyCreated,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// May the scheduler retry the work that produced this error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transaction(t) => matches!(
                t.kind,
                TransactionErrorKind::Server | TransactionErrorKind::Stopped
            ),
            Error::Connection(_) => true,
            _ => false,
        }
    }

    /// Server error code, if available (e.g. "57P01" for admin shutdown)
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Transaction(t) => t.code.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a connect failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Connect,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a server-reported transaction failure.
    pub fn server(message: impl Into<String>, code: Option<String>) -> Self {
        Error::Transaction(TransactionError {
            kind: TransactionErrorKind::Server,
            message: message.into(),
            code,
        })
    }

    /// Shorthand for a failure the scheduler imposed on a transaction.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
            code: None,
        })
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Transaction(e) => {
                if let Some(code) = &e.code {
                    write!(f, "{} (SQLSTATE {})", e.message, code)
                } else {
                    write!(f, "{}", e.message)
                }
            }
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::QueueFull { .. } => write!(f, "queue is full"),
            Error::Shutdown => write!(f, "worker has shut down"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for pgmux operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_helper() {
        let err = Error::server("terminating connection", Some("57P01".to_string()));
        assert_eq!(err.code(), Some("57P01"));
        assert_eq!(
            err.to_string(),
            "terminating connection (SQLSTATE 57P01)"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn queue_full_is_reported_verbatim() {
        let err = Error::QueueFull { capacity: 10 };
        assert_eq!(err.to_string(), "queue is full");
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        let conn = Error::connect("connection refused");
        assert!(conn.is_retryable());
        assert_eq!(conn.to_string(), "Connection error: connection refused");
        assert_eq!(conn.code(), None);

        let stopped = Error::transaction(TransactionErrorKind::Stopped, "transaction stopped");
        assert!(stopped.is_retryable());
        assert_eq!(stopped.to_string(), "transaction stopped");

        let dropped = Error::transaction(TransactionErrorKind::Dropped, "dropped");
        assert!(!dropped.is_retryable());
        assert!(!Error::Shutdown.is_retryable());

        let pool = Error::Pool(PoolError {
            kind: PoolErrorKind::AlreadyCreated,
            message: "primary pool already created".to_string(),
        });
        assert_eq!(pool.to_string(), "Pool error: primary pool already created");
    }
}
