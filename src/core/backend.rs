/// Connection wrapper: one physical connection plus its routing identity and
/// blocklist state
use crate::core::{Clock, Connection, Role};
use crate::events::{EventRegistry, RouterEvent};
use crate::health::ErrorMatcher;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NOT_BLOCKLISTED: u64 = 0;
const BLOCKLISTED_FOREVER: u64 = u64::MAX;

/// Default time a failing connection stays out of rotation
pub const DEFAULT_BLOCKLIST_DURATION: Duration = Duration::from_secs(30);

/// A connection decorated with name, role, weight, shard and blocklist timer
pub struct ConnectionWrapper {
    name: String,
    role: Role,
    shard_id: Option<String>,
    weight: usize,
    blocklist_duration: Duration,
    error_matchers: Vec<ErrorMatcher>,
    connection: Arc<dyn Connection>,
    clock: Arc<dyn Clock>,
    events: EventRegistry,
    /// Epoch millis; `NOT_BLOCKLISTED` or `BLOCKLISTED_FOREVER` are sentinels
    blocklisted_until: AtomicU64,
    connected: AtomicBool,
}

impl ConnectionWrapper {
    pub fn new<S: Into<String>>(
        name: S,
        role: Role,
        connection: Arc<dyn Connection>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            shard_id: None,
            weight: 1,
            blocklist_duration: DEFAULT_BLOCKLIST_DURATION,
            error_matchers: Vec::new(),
            connection,
            clock,
            events: EventRegistry::new(),
            blocklisted_until: AtomicU64::new(NOT_BLOCKLISTED),
            connected: AtomicBool::new(false),
        }
    }

    /// Weights below 1 are clamped to 1
    pub fn with_weight(mut self, weight: usize) -> Self {
        if weight == 0 {
            warn!(connection = %self.name, "weight 0 is not allowed, using 1");
        }
        self.weight = weight.max(1);
        self
    }

    pub fn with_shard<S: Into<String>>(mut self, shard_id: S) -> Self {
        self.shard_id = Some(shard_id.into());
        self
    }

    pub fn with_blocklist_duration(mut self, duration: Duration) -> Self {
        self.blocklist_duration = duration;
        self
    }

    pub fn with_error_matchers(mut self, matchers: Vec<ErrorMatcher>) -> Self {
        self.error_matchers = matchers;
        self
    }

    pub fn with_events(mut self, events: EventRegistry) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn shard_id(&self) -> Option<&str> {
        self.shard_id.as_deref()
    }

    pub fn weight(&self) -> usize {
        self.weight
    }

    pub fn blocklist_duration(&self) -> Duration {
        self.blocklist_duration
    }

    pub fn error_matchers(&self) -> &[ErrorMatcher] {
        &self.error_matchers
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// True once any call through this wrapper has succeeded
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    /// True if the underlying connection reports an open transaction
    pub fn in_transaction(&self) -> bool {
        self.connection
            .open_transaction_count()
            .map_or(false, |count| count > 0)
    }

    /// Epoch millis the blocklist expires at; `None` if not blocklisted or permanent
    pub fn blocklisted_until(&self) -> Option<u64> {
        match self.blocklisted_until.load(Ordering::Acquire) {
            NOT_BLOCKLISTED | BLOCKLISTED_FOREVER => None,
            until => Some(until),
        }
    }

    pub fn is_drained(&self) -> bool {
        self.blocklisted_until.load(Ordering::Acquire) == BLOCKLISTED_FOREVER
    }

    /// Non-mutating view of the blocklist timer
    pub fn blocklist_active(&self) -> bool {
        let until = self.blocklisted_until.load(Ordering::Acquire);
        until == BLOCKLISTED_FOREVER || (until != NOT_BLOCKLISTED && until > self.clock.now_millis())
    }

    /// True while the connection is out of rotation.
    ///
    /// The first check after a blocklist expires attempts a reconnect; a failed
    /// reconnect puts the connection straight back on the blocklist.
    pub async fn blocklisted(&self) -> bool {
        let until = self.blocklisted_until.load(Ordering::Acquire);
        match until {
            NOT_BLOCKLISTED => false,
            BLOCKLISTED_FOREVER => true,
            until if until > self.clock.now_millis() => true,
            expired => {
                // Only the task that clears the timer reconnects
                if self
                    .blocklisted_until
                    .compare_exchange(expired, NOT_BLOCKLISTED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return self.blocklist_active();
                }
                self.reconnect_after_blocklist().await
            }
        }
    }

    async fn reconnect_after_blocklist(&self) -> bool {
        match self.connection.reconnect().await {
            Ok(()) => {
                info!(connection = %self.name, role = %self.role, "reconnected after blocklist expiry");
                self.mark_connected();
                self.events.emit(RouterEvent::Reconnected {
                    connection: self.name.clone(),
                    success: true,
                });
                self.events.emit(RouterEvent::Unblocked {
                    connection: self.name.clone(),
                });
                false
            }
            Err(error) => {
                self.events.emit(RouterEvent::Reconnected {
                    connection: self.name.clone(),
                    success: false,
                });
                self.blocklist(&format!("reconnect failed: {}", error));
                true
            }
        }
    }

    /// Blocklist for the configured duration
    pub fn blocklist(&self, reason: &str) {
        self.blocklist_for(self.blocklist_duration, reason);
    }

    pub fn blocklist_for(&self, duration: Duration, reason: &str) {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let until = self
            .clock
            .now_millis()
            .saturating_add(duration_ms)
            .min(BLOCKLISTED_FOREVER - 1)
            .max(1);
        // A drained connection stays drained
        let applied = self
            .blocklisted_until
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != BLOCKLISTED_FOREVER).then_some(until)
            })
            .is_ok();
        if !applied {
            debug!(connection = %self.name, reason = reason, "connection drained, blocklist ignored");
            return;
        }
        warn!(
            connection = %self.name,
            role = %self.role,
            duration_ms = duration_ms,
            reason = reason,
            "connection blocklisted"
        );
        self.events.emit(RouterEvent::Blocklisted {
            connection: self.name.clone(),
            role: self.role,
            duration: Some(duration),
            reason: reason.to_string(),
        });
    }

    /// Remove from rotation until explicitly unblocked
    pub fn blocklist_forever(&self, reason: &str) {
        self.blocklisted_until
            .store(BLOCKLISTED_FOREVER, Ordering::Release);
        warn!(connection = %self.name, role = %self.role, reason = reason, "connection drained");
        self.events.emit(RouterEvent::Blocklisted {
            connection: self.name.clone(),
            role: self.role,
            duration: None,
            reason: reason.to_string(),
        });
    }

    /// Clear any blocklist entry, including a permanent one
    pub fn unblock(&self) {
        let previous = self
            .blocklisted_until
            .swap(NOT_BLOCKLISTED, Ordering::AcqRel);
        if previous != NOT_BLOCKLISTED {
            debug!(connection = %self.name, "connection unblocked");
            self.events.emit(RouterEvent::Unblocked {
                connection: self.name.clone(),
            });
        }
    }

    /// Clear a timed blocklist entry; permanent entries are left in place
    pub fn reset_blocklist(&self) {
        let cleared = self
            .blocklisted_until
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != NOT_BLOCKLISTED && current != BLOCKLISTED_FOREVER)
                    .then_some(NOT_BLOCKLISTED)
            })
            .is_ok();
        if cleared {
            debug!(connection = %self.name, "blocklist entry reset");
            self.events.emit(RouterEvent::Unblocked {
                connection: self.name.clone(),
            });
        }
    }
}

impl fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("shard_id", &self.shard_id)
            .field("weight", &self.weight)
            .field("blocklisted_until", &self.blocklisted_until.load(Ordering::Relaxed))
            .field("connected", &self.is_connected())
            .finish()
    }
}
