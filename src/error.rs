/// Unified error handling for the relevo router
///
/// This module provides the error taxonomy shared by pools, strategies and the
/// proxy: driver failures passed through untouched, connection-loss failures
/// that drive blocklisting, and the pool exhaustion errors surfaced to callers.
use crate::core::Role;
use std::fmt;
use thiserror::Error;

/// Main error type for relevo operations
#[derive(Debug, Clone, Error)]
pub enum RelevoError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error raised by the underlying connection and passed through unchanged
    #[error("{0}")]
    Driver(DriverError),

    /// A connection-loss failure on one connection; absorbed by the pool
    #[error("[relevo/{connection}] {source}")]
    BlocklistConnection {
        connection: String,
        source: DriverError,
    },

    /// Every connection in the pool is blocklisted
    #[error("[relevo/{role}] All connections are blocklisted{}", chain_suffix(.errors))]
    AllConnectionsBlocklisted { role: Role, errors: Vec<RelevoError> },

    /// The pool never managed to use any of its connections
    #[error("[relevo/{role}] No connections are available")]
    NoConnectionsAvailable { role: Role },

    /// A connection was lost while a transaction was open on it
    #[error("[relevo/{role}] Blocklisted while in transaction")]
    BlocklistedWhileInTransaction { role: Role },

    /// The resolved shard has no connections registered for it
    #[error("[relevo/{role}] Invalid shard: {shard_id}")]
    InvalidShard { role: Role, shard_id: String },

    /// Stickiness cache failures
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// No connection was found under the given name
    #[error("Unknown connection: {name}")]
    UnknownConnection { name: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },
}

fn chain_suffix(errors: &[RelevoError]) -> String {
    errors.iter().map(|e| format!(" -> {}", e)).collect()
}

/// Error reported by an underlying connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// Driver-specific error class, e.g. `PG::ReadOnlySqlTransaction`
    pub class: Option<String>,
    pub message: String,
}

/// Coarse classification an underlying driver can attach to its errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    Other,
}

impl DriverError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            class: None,
            message: message.into(),
        }
    }

    pub fn unique_violation<S: Into<String>>(message: S) -> Self {
        Self {
            kind: DriverErrorKind::UniqueViolation,
            ..Self::new(message)
        }
    }

    pub fn foreign_key_violation<S: Into<String>>(message: S) -> Self {
        Self {
            kind: DriverErrorKind::ForeignKeyViolation,
            ..Self::new(message)
        }
    }

    /// Attach the driver's error class name
    pub fn with_class<S: Into<String>>(mut self, class: S) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Returned by connections for methods they do not implement
    pub fn unsupported(method: &str) -> Self {
        Self::new(format!("unsupported method: {}", method))
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::UniqueViolation | DriverErrorKind::ForeignKeyViolation
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Stickiness cache store errors
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache read failed for {key}: {message}")]
    Read { key: String, message: String },

    #[error("cache write failed for {key}: {message}")]
    Write { key: String, message: String },
}

/// Result type alias for relevo operations
pub type RelevoResult<T> = Result<T, RelevoError>;

/// Convenience methods for creating specific error types
impl RelevoError {
    /// Create a blocklist error for the named connection
    pub fn blocklist_connection<S: Into<String>>(connection: S, source: DriverError) -> Self {
        RelevoError::BlocklistConnection {
            connection: connection.into(),
            source,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        RelevoError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        RelevoError::Config(ConfigError::ValidationError(message.into()))
    }

    /// True for the two errors that mean a pool could not serve the call
    pub fn is_pool_exhaustion(&self) -> bool {
        matches!(
            self,
            RelevoError::AllConnectionsBlocklisted { .. }
                | RelevoError::NoConnectionsAvailable { .. }
        )
    }

    /// Check if this error is recoverable (a later call may succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            RelevoError::BlocklistConnection { .. } => true,
            RelevoError::AllConnectionsBlocklisted { .. } => true,
            RelevoError::NoConnectionsAvailable { .. } => true,
            RelevoError::Cache(_) => true,
            RelevoError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RelevoError::Config(_) => ErrorSeverity::Critical,
            RelevoError::InvalidShard { .. } => ErrorSeverity::Critical,
            RelevoError::BlocklistedWhileInTransaction { .. } => ErrorSeverity::Critical,
            RelevoError::AllConnectionsBlocklisted { .. } => ErrorSeverity::Error,
            RelevoError::NoConnectionsAvailable { .. } => ErrorSeverity::Error,
            RelevoError::BlocklistConnection { .. } => ErrorSeverity::Warning,
            RelevoError::Cache(_) => ErrorSeverity::Warning,
            RelevoError::Timeout { .. } => ErrorSeverity::Warning,
            RelevoError::Driver(_) => ErrorSeverity::Info,
            RelevoError::UnknownConnection { .. } => ErrorSeverity::Error,
        }
    }

    /// Flatten the blocklist chain into `(connection, error)` pairs, most recent first
    pub fn blocklist_chain(&self) -> Vec<(String, DriverError)> {
        let mut chain = Vec::new();
        self.collect_chain(&mut chain);
        chain
    }

    fn collect_chain(&self, chain: &mut Vec<(String, DriverError)>) {
        match self {
            RelevoError::BlocklistConnection { connection, source } => {
                chain.push((connection.clone(), source.clone()));
            }
            RelevoError::AllConnectionsBlocklisted { errors, .. } => {
                for error in errors {
                    error.collect_chain(chain);
                }
            }
            _ => {}
        }
    }
}

impl From<DriverError> for RelevoError {
    fn from(error: DriverError) -> Self {
        RelevoError::Driver(error)
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
