/// Method dispatch table
///
/// Every method a proxy accepts by name falls into one of three kinds:
/// statements it routes itself, control-plane calls broadcast to every
/// connection, and anything else, delegated to a single connection.
use crate::core::{Connection, Rows};
use crate::error::DriverError;
use std::fmt;

/// Control-plane operations broadcast to every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Connect,
    Disconnect,
    Reconnect,
    /// Reconnect only if the liveness check fails
    Verify,
    ClearCache,
    Reset,
}

/// How a named method is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// First argument is a statement, routed by classification
    Hijacked,
    Broadcast(ControlOp),
    /// Passed to one connection, primary preferred
    Delegated,
}

static DISPATCH_TABLE: &[(&str, DispatchKind)] = &[
    ("execute", DispatchKind::Hijacked),
    ("exec_query", DispatchKind::Hijacked),
    ("query", DispatchKind::Hijacked),
    ("select_all", DispatchKind::Hijacked),
    ("select_rows", DispatchKind::Hijacked),
    ("select_value", DispatchKind::Hijacked),
    ("insert", DispatchKind::Hijacked),
    ("update", DispatchKind::Hijacked),
    ("delete", DispatchKind::Hijacked),
    ("connect", DispatchKind::Broadcast(ControlOp::Connect)),
    ("disconnect", DispatchKind::Broadcast(ControlOp::Disconnect)),
    ("reconnect", DispatchKind::Broadcast(ControlOp::Reconnect)),
    ("verify", DispatchKind::Broadcast(ControlOp::Verify)),
    ("clear_cache", DispatchKind::Broadcast(ControlOp::ClearCache)),
    ("reset", DispatchKind::Broadcast(ControlOp::Reset)),
];

/// Dispatch kind for `method`; unknown methods are delegated
pub fn lookup(method: &str) -> DispatchKind {
    DISPATCH_TABLE
        .iter()
        .find(|(name, _)| *name == method)
        .map_or(DispatchKind::Delegated, |(_, kind)| *kind)
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::Connect => "connect",
            ControlOp::Disconnect => "disconnect",
            ControlOp::Reconnect => "reconnect",
            ControlOp::Verify => "verify",
            ControlOp::ClearCache => "clear_cache",
            ControlOp::Reset => "reset",
        }
    }

    /// Apply the operation to one connection
    pub async fn apply(&self, connection: &dyn Connection, args: &[String]) -> Result<Rows, DriverError> {
        match self {
            ControlOp::Connect | ControlOp::Reconnect => connection.reconnect().await?,
            ControlOp::Disconnect => connection.close().await?,
            ControlOp::Verify => {
                if !connection.is_alive().await {
                    connection.reconnect().await?;
                }
            }
            ControlOp::ClearCache | ControlOp::Reset => {
                return connection.invoke(self.as_str(), args).await;
            }
        }
        Ok(Rows::default())
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::mock::MockConnection;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("execute"), DispatchKind::Hijacked);
        assert_eq!(lookup("select_value"), DispatchKind::Hijacked);
        assert_eq!(lookup("verify"), DispatchKind::Broadcast(ControlOp::Verify));
        assert_eq!(lookup("quote_table_name"), DispatchKind::Delegated);
        assert_eq!(lookup("EXECUTE"), DispatchKind::Delegated);
    }

    #[test]
    fn test_table_has_no_duplicates() {
        let mut names: Vec<&str> = DISPATCH_TABLE.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), DISPATCH_TABLE.len());
    }

    #[tokio::test]
    async fn test_verify_reconnects_only_dead_connections() {
        let mock = MockConnection::new();
        ControlOp::Verify.apply(&mock, &[]).await.unwrap();
        assert_eq!(mock.reconnects.load(Ordering::SeqCst), 0);

        mock.alive.store(false, Ordering::SeqCst);
        ControlOp::Verify.apply(&mock, &[]).await.unwrap();
        assert_eq!(mock.reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply() {
        let mock = MockConnection::new();
        ControlOp::Disconnect.apply(&mock, &[]).await.unwrap();
        ControlOp::Connect.apply(&mock, &[]).await.unwrap();
        ControlOp::ClearCache.apply(&mock, &[]).await.unwrap();
        assert_eq!(mock.closes.load(Ordering::SeqCst), 1);
        assert_eq!(mock.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(*mock.invocations.lock(), vec!["clear_cache"]);
        assert_eq!(ControlOp::Reset.to_string(), "reset");
    }
}
