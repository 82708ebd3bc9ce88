/// A pool of connections sharing one role
use crate::balancer::Strategy;
use crate::context;
use crate::core::{ConnectionWrapper, Role};
use crate::error::{DriverError, RelevoError, RelevoResult};
use crate::events::{EventRegistry, RouterEvent};
use crate::health::ErrorHandler;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Weighted candidates for one role, a selection strategy, and the errors
/// collected since the last successful call.
pub struct Pool {
    role: Role,
    proxy_id: String,
    connections: Vec<Arc<ConnectionWrapper>>,
    strategy: Box<dyn Strategy>,
    error_handler: ErrorHandler,
    events: EventRegistry,
    /// Most recent first
    blocklist_errors: Mutex<Vec<RelevoError>>,
    disabled: AtomicBool,
    sticky: bool,
}

impl Pool {
    pub fn new(role: Role, strategy: Box<dyn Strategy>) -> Self {
        Self {
            role,
            proxy_id: String::new(),
            connections: Vec::new(),
            strategy,
            error_handler: ErrorHandler::new(),
            events: EventRegistry::new(),
            blocklist_errors: Mutex::new(Vec::new()),
            disabled: AtomicBool::new(false),
            sticky: false,
        }
    }

    pub fn with_proxy_id<S: Into<String>>(mut self, proxy_id: S) -> Self {
        self.proxy_id = proxy_id.into();
        self
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn with_events(mut self, events: EventRegistry) -> Self {
        self.events = events;
        self
    }

    /// Reuse the connection last served to the current unit of work
    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Register a connection with the pool and its strategy
    pub fn add(&mut self, wrapper: Arc<ConnectionWrapper>) -> RelevoResult<()> {
        if self.connections.iter().any(|c| c.name() == wrapper.name()) {
            return Err(RelevoError::validation(format!(
                "duplicate connection name '{}' in {} pool",
                wrapper.name(),
                self.role
            )));
        }
        self.strategy.connection_added(Arc::clone(&wrapper))?;
        self.connections.push(wrapper);
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connections(&self) -> &[Arc<ConnectionWrapper>] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn connection(&self, name: &str) -> RelevoResult<Arc<ConnectionWrapper>> {
        self.connections
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| RelevoError::UnknownConnection {
                name: name.to_string(),
            })
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// A disabled pool that cannot serve a call returns nothing instead of failing
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    /// True once any connection in the pool has served a call
    pub fn connection_made(&self) -> bool {
        self.connections.iter().any(|c| c.is_connected())
    }

    /// Vacuously true for an empty pool
    pub async fn completely_blocklisted(&self) -> bool {
        for wrapper in &self.connections {
            if !wrapper.blocklisted().await {
                return false;
            }
        }
        true
    }

    pub fn any_in_transaction(&self) -> bool {
        self.connections.iter().any(|c| c.in_transaction())
    }

    /// Clear every timed blocklist entry; drained connections stay out
    pub fn unblock_all(&self) {
        for wrapper in &self.connections {
            wrapper.reset_blocklist();
        }
    }

    /// Record an error raised elsewhere (for example by the other pool) so it
    /// shows up in this pool's next exhaustion error
    pub fn push_blocklist_error(&self, error: RelevoError) {
        self.blocklist_errors.lock().insert(0, error);
    }

    pub fn blocklist_error_count(&self) -> usize {
        self.blocklist_errors.lock().len()
    }

    /// The strategy's current selection, without advancing it
    pub async fn peek(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        self.strategy.current().await
    }

    fn pin_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.proxy_id,
            self.role,
            context::current_shard().unwrap_or_default()
        )
    }

    async fn select(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        if !self.sticky || !context::in_unit_of_work() {
            return self.strategy.next().await;
        }

        let key = self.pin_key();
        let pinned = context::with_current(|c| c.pinned(&key).map(str::to_string)).flatten();
        if let Some(wrapper) = pinned.and_then(|name| self.connection(&name).ok()) {
            if !wrapper.blocklisted().await {
                return Ok(Some(wrapper));
            }
        }

        let selected = self.strategy.next().await?;
        if let Some(wrapper) = &selected {
            context::with_current(|c| c.pin(&key, wrapper.name()));
        }
        Ok(selected)
    }

    fn exhausted<T>(&self) -> RelevoResult<Option<T>> {
        let errors = std::mem::take(&mut *self.blocklist_errors.lock());
        if self.connection_made() {
            warn!(role = %self.role, errors = errors.len(), "all connections are blocklisted");
            return Err(RelevoError::AllConnectionsBlocklisted {
                role: self.role,
                errors,
            });
        }
        if self.is_disabled() {
            debug!(role = %self.role, "pool disabled, nothing to provide");
            return Ok(None);
        }
        Err(RelevoError::NoConnectionsAvailable { role: self.role })
    }

    fn record_blocklist(&self, wrapper: &ConnectionWrapper, error: RelevoError) {
        let reason = match &error {
            RelevoError::BlocklistConnection { source, .. } => source.message.clone(),
            other => other.to_string(),
        };
        wrapper.blocklist(&reason);
        self.blocklist_errors.lock().insert(0, error);
    }

    /// Run `work` on a selected connection.
    ///
    /// A connection-loss failure blocklists the connection and retries on
    /// another, at most once per connection. `Ok(None)` means the pool is
    /// disabled and had nothing to offer.
    pub async fn provide<T, F, Fut>(&self, mut work: F) -> RelevoResult<Option<T>>
    where
        F: FnMut(Arc<ConnectionWrapper>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut attempt = 0;
        loop {
            let Some(wrapper) = self.select().await? else {
                return self.exhausted();
            };

            match self
                .error_handler
                .handle(&wrapper, work(Arc::clone(&wrapper)))
                .await
            {
                Ok(value) => {
                    self.blocklist_errors.lock().clear();
                    wrapper.mark_connected();
                    debug!(connection = %wrapper.name(), role = %self.role, "routed");
                    self.events.emit(RouterEvent::Routed {
                        connection: wrapper.name().to_string(),
                        role: self.role,
                    });
                    return Ok(Some(value));
                }
                Err(error @ RelevoError::BlocklistConnection { .. }) => {
                    let in_transaction = self.role == Role::Primary && wrapper.in_transaction();
                    self.record_blocklist(&wrapper, error);
                    if in_transaction {
                        warn!(connection = %wrapper.name(), "connection lost inside a transaction");
                        return Err(RelevoError::BlocklistedWhileInTransaction { role: self.role });
                    }
                    attempt += 1;
                    if attempt >= self.connections.len() {
                        return self.exhausted();
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Run `work` on every connection that is not blocklisted.
    ///
    /// Connection-loss failures blocklist that connection and move on; any
    /// other failure aborts. Fails like [`Pool::provide`] when nothing succeeded.
    pub async fn send_to_all<T, F, Fut>(&self, mut work: F) -> RelevoResult<Vec<T>>
    where
        F: FnMut(Arc<ConnectionWrapper>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut results = Vec::with_capacity(self.connections.len());
        for wrapper in &self.connections {
            if wrapper.blocklisted().await {
                debug!(connection = %wrapper.name(), "skipping blocklisted connection");
                continue;
            }
            match self
                .error_handler
                .handle(wrapper, work(Arc::clone(wrapper)))
                .await
            {
                Ok(value) => {
                    wrapper.mark_connected();
                    results.push(value);
                }
                Err(error @ RelevoError::BlocklistConnection { .. }) => {
                    self.record_blocklist(wrapper, error);
                }
                Err(error) => return Err(error),
            }
        }

        if results.is_empty() {
            self.exhausted::<()>()?;
            return Ok(results);
        }
        self.blocklist_errors.lock().clear();
        info!(role = %self.role, connections = results.len(), "sent to all connections");
        Ok(results)
    }
}
