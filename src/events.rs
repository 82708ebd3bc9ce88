/// Observer registry for routing and health events
///
/// Observers are plain callbacks registered on the registry a proxy was built
/// with. They run synchronously on the calling task, so they must be cheap.
use crate::core::Role;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something observable happened inside the router
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    /// A call was handed to a connection
    Routed { connection: String, role: Role },
    /// A connection was removed from rotation; `duration` is `None` when permanent
    Blocklisted {
        connection: String,
        role: Role,
        duration: Option<Duration>,
        reason: String,
    },
    /// A connection came back into rotation
    Unblocked { connection: String },
    /// A reconnect attempt after a blocklist expired
    Reconnected { connection: String, success: bool },
    /// The proxy pinned the current unit of work to the primary
    StuckToPrimary { proxy_id: String, ttl: Duration },
    /// A replica pool was exhausted and the call moved to the primary pool
    FailedOver { from: Role },
    /// Both pools were exhausted and every blocklist entry was cleared
    BlocklistReset,
}

impl fmt::Display for RouterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterEvent::Routed { connection, role } => {
                write!(f, "routed to {} ({})", connection, role)
            }
            RouterEvent::Blocklisted {
                connection,
                duration: Some(duration),
                reason,
                ..
            } => write!(
                f,
                "blocklisted {} for {}: {}",
                connection,
                crate::utils::format_duration(*duration),
                reason
            ),
            RouterEvent::Blocklisted {
                connection, reason, ..
            } => write!(f, "blocklisted {} permanently: {}", connection, reason),
            RouterEvent::Unblocked { connection } => write!(f, "unblocked {}", connection),
            RouterEvent::Reconnected {
                connection,
                success,
            } => write!(
                f,
                "reconnect of {} {}",
                connection,
                if *success { "succeeded" } else { "failed" }
            ),
            RouterEvent::StuckToPrimary { proxy_id, ttl } => write!(
                f,
                "proxy {} stuck to primary for {}",
                proxy_id,
                crate::utils::format_duration(*ttl)
            ),
            RouterEvent::FailedOver { from } => write!(f, "failed over from {} pool", from),
            RouterEvent::BlocklistReset => write!(f, "blocklist reset"),
        }
    }
}

/// Handle returned by [`EventRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&RouterEvent) + Send + Sync>;

/// Registry of event observers, shared by everything one proxy owns
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&RouterEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove one observer; returns false if it was not registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn clear(&self) {
        self.inner.observers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: RouterEvent) {
        // Clone the list so observers may register or unregister while running
        let observers: Vec<Observer> = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(&event);
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_register_and_emit() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.register(move |event| sink.lock().push(event.clone()));

        registry.emit(RouterEvent::BlocklistReset);
        assert_eq!(*seen.lock(), vec![RouterEvent::BlocklistReset]);
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = EventRegistry::new();
        let first = registry.register(|_| {});
        registry.register(|_| {});
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_observers() {
        let registry = EventRegistry::new();
        let clone = registry.clone();
        clone.register(|_| {});
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_event_display() {
        let event = RouterEvent::Blocklisted {
            connection: "replica/1".to_string(),
            role: Role::Replica,
            duration: Some(Duration::from_secs(30)),
            reason: "gone away".to_string(),
        };
        assert_eq!(event.to_string(), "blocklisted replica/1 for 30s: gone away");
    }
}
