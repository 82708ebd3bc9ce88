/// The capability set an underlying database connection must provide
///
/// The router never speaks a wire protocol itself. Anything that can run a
/// statement, reconnect, close, and report its open transaction count can be
/// routed.
use crate::error::DriverError;
use async_trait::async_trait;

/// A single result row; `None` is SQL NULL
pub type Row = Vec<Option<String>>;

/// Result of running a statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Rows affected by a write
    pub affected: u64,
}

impl Rows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            affected: 0,
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Underlying connection interface
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement and return its rows
    async fn execute(&self, statement: &str) -> Result<Rows, DriverError>;

    /// Re-establish the physical connection
    async fn reconnect(&self) -> Result<(), DriverError>;

    /// Close the physical connection
    async fn close(&self) -> Result<(), DriverError>;

    /// Cheap liveness check
    async fn is_alive(&self) -> bool;

    /// Number of open transactions, or `None` when the driver cannot tell
    fn open_transaction_count(&self) -> Option<usize> {
        None
    }

    /// Driver-specific methods reached through the proxy's delegation path
    async fn invoke(&self, method: &str, _args: &[String]) -> Result<Rows, DriverError> {
        Err(DriverError::unsupported(method))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scriptable in-memory connection used by unit tests
    #[derive(Default)]
    pub struct MockConnection {
        pub statements: Mutex<Vec<String>>,
        pub invocations: Mutex<Vec<String>>,
        /// Errors returned by the next calls, front first
        pub queued_failures: Mutex<VecDeque<DriverError>>,
        /// Error returned by every call while set
        pub failure: Mutex<Option<DriverError>>,
        pub reconnects: AtomicUsize,
        pub closes: AtomicUsize,
        pub reconnect_fails: AtomicBool,
        pub alive: AtomicBool,
        pub open_transactions: AtomicUsize,
        pub report_transactions: AtomicBool,
    }

    impl MockConnection {
        pub fn new() -> Self {
            let mock = Self::default();
            mock.alive.store(true, Ordering::SeqCst);
            mock.report_transactions.store(true, Ordering::SeqCst);
            mock
        }

        pub fn failing(message: &str) -> Self {
            let mock = Self::new();
            mock.fail_with(DriverError::new(message));
            mock
        }

        pub fn fail_with(&self, error: DriverError) {
            *self.failure.lock() = Some(error);
        }

        pub fn fail_next(&self, error: DriverError) {
            self.queued_failures.lock().push_back(error);
        }

        pub fn heal(&self) {
            *self.failure.lock() = None;
            self.queued_failures.lock().clear();
        }

        pub fn executed(&self) -> Vec<String> {
            self.statements.lock().clone()
        }

        pub fn execution_count(&self) -> usize {
            self.statements.lock().len()
        }

        fn next_failure(&self) -> Option<DriverError> {
            if let Some(error) = self.queued_failures.lock().pop_front() {
                return Some(error);
            }
            self.failure.lock().clone()
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn execute(&self, statement: &str) -> Result<Rows, DriverError> {
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            self.statements.lock().push(statement.to_string());
            Ok(Rows::affected(1))
        }

        async fn reconnect(&self) -> Result<(), DriverError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if self.reconnect_fails.load(Ordering::SeqCst) {
                return Err(DriverError::new("could not connect to server"));
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), DriverError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn open_transaction_count(&self) -> Option<usize> {
            if self.report_transactions.load(Ordering::SeqCst) {
                Some(self.open_transactions.load(Ordering::SeqCst))
            } else {
                None
            }
        }

        async fn invoke(&self, method: &str, _args: &[String]) -> Result<Rows, DriverError> {
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            self.invocations.lock().push(method.to_string());
            Ok(Rows::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnection;
    use super::*;

    struct Minimal;

    #[async_trait]
    impl Connection for Minimal {
        async fn execute(&self, _statement: &str) -> Result<Rows, DriverError> {
            Ok(Rows::default())
        }

        async fn reconnect(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn is_alive(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_default_capabilities() {
        let conn = Minimal;
        assert_eq!(conn.open_transaction_count(), None);
        let err = conn.invoke("clear_cache", &[]).await.unwrap_err();
        assert_eq!(err.message, "unsupported method: clear_cache");
    }

    #[tokio::test]
    async fn test_mock_queued_failures_come_first() {
        let conn = MockConnection::new();
        conn.fail_next(DriverError::new("gone away"));

        assert!(conn.execute("SELECT 1").await.is_err());
        assert!(conn.execute("SELECT 1").await.is_ok());
        assert_eq!(conn.executed(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_rows_helpers() {
        let rows = Rows::new(
            vec!["id".to_string()],
            vec![vec![Some("1".to_string())], vec![None]],
        );
        assert_eq!(rows.len(), 2);
        assert!(!rows.is_empty());
        assert_eq!(Rows::affected(3).affected, 3);
    }
}
