/// Error classification for calls made through a connection wrapper
///
/// Every call a pool makes runs through [`ErrorHandler::handle`]. Failures are
/// sorted into three buckets:
/// - harsh: data-integrity violations and configured error classes, re-raised as is
/// - connection loss: converted to `BlocklistConnection` so the pool blocklists and retries
/// - anything else: re-raised as is, since guessing wrong would blocklist a healthy node
pub mod patterns;

pub use patterns::{is_connection_loss, parse_matchers, ErrorMatcher};

use crate::core::ConnectionWrapper;
use crate::error::{DriverError, RelevoError, RelevoResult};
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// How a failed call is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Integrity violation or configured class; never blocklists
    Harsh,
    /// The connection is gone; blocklist it and retry elsewhere
    ConnectionLoss,
    /// Not recognised; re-raised without blocklisting
    Unclassified,
}

impl fmt::Display for ErrorVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorVerdict::Harsh => write!(f, "Harsh"),
            ErrorVerdict::ConnectionLoss => write!(f, "ConnectionLoss"),
            ErrorVerdict::Unclassified => write!(f, "Unclassified"),
        }
    }
}

impl ErrorVerdict {
    pub fn is_blocklist_worthy(&self) -> bool {
        matches!(self, ErrorVerdict::ConnectionLoss)
    }
}

/// Classifies driver errors and wraps calls made on a connection
#[derive(Debug, Clone, Default)]
pub struct ErrorHandler {
    harsh_classes: Vec<String>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error classes that always re-raise, whatever their message says
    pub fn with_harsh_classes(harsh_classes: Vec<String>) -> Self {
        Self { harsh_classes }
    }

    pub fn classify(&self, wrapper: &ConnectionWrapper, error: &DriverError) -> ErrorVerdict {
        if error.is_integrity_violation() || self.is_harsh_class(error) {
            return ErrorVerdict::Harsh;
        }
        if is_connection_loss(&error.message) {
            return ErrorVerdict::ConnectionLoss;
        }
        if wrapper
            .error_matchers()
            .iter()
            .any(|matcher| matcher.matches(&error.message))
        {
            return ErrorVerdict::ConnectionLoss;
        }
        ErrorVerdict::Unclassified
    }

    fn is_harsh_class(&self, error: &DriverError) -> bool {
        error
            .class
            .as_deref()
            .map_or(false, |class| self.harsh_classes.iter().any(|harsh| harsh == class))
    }

    /// Run `work` on behalf of `wrapper`, translating its failure
    pub async fn handle<T, F>(&self, wrapper: &ConnectionWrapper, work: F) -> RelevoResult<T>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        match work.await {
            Ok(value) => Ok(value),
            Err(error) => match self.classify(wrapper, &error) {
                ErrorVerdict::ConnectionLoss => {
                    warn!(
                        connection = %wrapper.name(),
                        role = %wrapper.role(),
                        error = %error,
                        "connection loss detected"
                    );
                    Err(RelevoError::blocklist_connection(wrapper.name(), error))
                }
                verdict => {
                    debug!(
                        connection = %wrapper.name(),
                        verdict = %verdict,
                        error = %error,
                        "passing driver error through"
                    );
                    Err(RelevoError::Driver(error))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::mock::MockConnection;
    use crate::core::{ManualClock, Role};
    use std::sync::Arc;

    fn wrapper_with(matchers: &[&str]) -> ConnectionWrapper {
        let specs: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
        ConnectionWrapper::new(
            "replica/1",
            Role::Replica,
            Arc::new(MockConnection::new()),
            Arc::new(ManualClock::starting_now()),
        )
        .with_error_matchers(parse_matchers(&specs).unwrap())
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(ErrorVerdict::ConnectionLoss.to_string(), "ConnectionLoss");
        assert!(ErrorVerdict::ConnectionLoss.is_blocklist_worthy());
        assert!(!ErrorVerdict::Harsh.is_blocklist_worthy());
    }

    #[test]
    fn test_integrity_violations_are_harsh() {
        let handler = ErrorHandler::new();
        let wrapper = wrapper_with(&[]);
        // Even with a connection-loss looking message
        let error = DriverError::unique_violation("duplicate key; lost connection");
        assert_eq!(handler.classify(&wrapper, &error), ErrorVerdict::Harsh);
        let error = DriverError::foreign_key_violation("violates foreign key constraint");
        assert_eq!(handler.classify(&wrapper, &error), ErrorVerdict::Harsh);
    }

    #[test]
    fn test_configured_harsh_classes() {
        let handler = ErrorHandler::with_harsh_classes(vec!["PG::QueryCanceled".to_string()]);
        let wrapper = wrapper_with(&[]);
        let error = DriverError::new("timeout expired").with_class("PG::QueryCanceled");
        assert_eq!(handler.classify(&wrapper, &error), ErrorVerdict::Harsh);
    }

    #[test]
    fn test_custom_matchers_only_extend_builtins() {
        let handler = ErrorHandler::new();
        let wrapper = wrapper_with(&["/read-only/i"]);

        let builtin = DriverError::new("MySQL server has gone away");
        assert_eq!(handler.classify(&wrapper, &builtin), ErrorVerdict::ConnectionLoss);

        let custom = DriverError::new("The MySQL server is running with the --READ-ONLY option");
        assert_eq!(handler.classify(&wrapper, &custom), ErrorVerdict::ConnectionLoss);

        let other = DriverError::new("syntax error");
        assert_eq!(handler.classify(&wrapper, &other), ErrorVerdict::Unclassified);
    }

    #[tokio::test]
    async fn test_handle_wraps_connection_loss() {
        let handler = ErrorHandler::new();
        let wrapper = wrapper_with(&[]);

        let result: RelevoResult<()> = handler
            .handle(&wrapper, async { Err(DriverError::new("connection refused")) })
            .await;
        match result {
            Err(RelevoError::BlocklistConnection { connection, source }) => {
                assert_eq!(connection, "replica/1");
                assert_eq!(source.message, "connection refused");
            }
            other => panic!("expected blocklist error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_passes_through_other_errors() {
        let handler = ErrorHandler::new();
        let wrapper = wrapper_with(&[]);

        let result: RelevoResult<()> = handler
            .handle(&wrapper, async { Err(DriverError::new("syntax error")) })
            .await;
        assert!(matches!(result, Err(RelevoError::Driver(_))));

        let ok = handler.handle(&wrapper, async { Ok::<_, DriverError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
