/// The router: decides per statement which pool serves it
///
/// Decision order for a statement:
/// 1. session statements (`SET ...`) run on every connection, replicas first
/// 2. statements that need the primary go there, and make the unit of work sticky
/// 3. a unit of work already stuck to the primary stays there
/// 4. stickiness left by an earlier unit of work still applies
/// 5. with every replica blocklisted, reads go to the primary
/// 6. an open transaction on the primary keeps reads on the primary
/// 7. everything else goes to a replica
///
/// A replica pool that cannot serve a read fails over to the primary pool
/// once. When the primary pool cannot serve a call, every timed blocklist
/// entry in both pools is cleared before the error is returned.
pub mod dispatch;

pub use dispatch::{lookup, ControlOp, DispatchKind};

use crate::balancer::Strategy;
use crate::classifier::{self, Route};
use crate::config::{ConnectionConfig, ProxyConfig};
use crate::context::{self, CacheStickiness};
use crate::core::{Clock, Connection, ConnectionWrapper, Pool, Role, Rows, SystemClock};
use crate::error::{DriverError, RelevoError, RelevoResult};
use crate::events::{EventRegistry, RouterEvent};
use crate::health::{parse_matchers, ErrorHandler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Primary/replica router over two pools
pub struct Proxy {
    id: String,
    config: ProxyConfig,
    primary: Pool,
    replica: Pool,
    cache: Option<CacheStickiness>,
    events: EventRegistry,
}

/// Builds a [`Proxy`] from configuration and a connection factory
pub struct ProxyBuilder {
    config: ProxyConfig,
    clock: Arc<dyn Clock>,
    cache: Option<CacheStickiness>,
    events: EventRegistry,
    primary_strategy: Option<Box<dyn Strategy>>,
    replica_strategy: Option<Box<dyn Strategy>>,
}

impl ProxyBuilder {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            cache: None,
            events: EventRegistry::new(),
            primary_strategy: None,
            replica_strategy: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cache transport for units of work that carry a session key
    pub fn cache(mut self, cache: CacheStickiness) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn events(mut self, events: EventRegistry) -> Self {
        self.events = events;
        self
    }

    /// Use a custom strategy for one pool instead of the configured kind
    pub fn strategy(mut self, role: Role, strategy: Box<dyn Strategy>) -> Self {
        match role {
            Role::Primary => self.primary_strategy = Some(strategy),
            Role::Replica => self.replica_strategy = Some(strategy),
        }
        self
    }

    fn pool(&mut self, role: Role, id: &str, error_handler: &ErrorHandler) -> Pool {
        let custom = match role {
            Role::Primary => self.primary_strategy.take(),
            Role::Replica => self.replica_strategy.take(),
        };
        let strategy = custom.unwrap_or_else(|| {
            self.config.strategy(role).build_for_pool(
                role,
                self.config.shard_aware(role),
                self.config.default_shard(role),
                self.config.shuffle,
            )
        });
        Pool::new(role, strategy)
            .with_proxy_id(id)
            .with_error_handler(error_handler.clone())
            .with_events(self.events.clone())
            .with_sticky(self.config.sticky)
    }

    /// Validate the configuration and open every connection through `factory`
    pub fn build<F>(mut self, mut factory: F) -> RelevoResult<Proxy>
    where
        F: FnMut(&str, &ConnectionConfig) -> RelevoResult<Arc<dyn Connection>>,
    {
        self.config.validate()?;
        let id = self.config.resolved_id()?;
        let error_handler = ErrorHandler::with_harsh_classes(self.config.harsh_errors.clone());
        let mut primary = self.pool(Role::Primary, &id, &error_handler);
        let mut replica = self.pool(Role::Replica, &id, &error_handler);

        for (name, entry) in self.config.named_connections() {
            let connection = factory(&name, entry)?;
            let mut wrapper =
                ConnectionWrapper::new(name.as_str(), entry.role, connection, Arc::clone(&self.clock))
                    .with_weight(entry.weight)
                    .with_blocklist_duration(self.config.blocklist_duration_for(entry))
                    .with_error_matchers(parse_matchers(&entry.connection_error_matchers)?)
                    .with_events(self.events.clone());
            if let Some(shard_id) = &entry.shard_id {
                wrapper = wrapper.with_shard(shard_id.as_str());
            }
            match entry.role {
                Role::Primary => primary.add(Arc::new(wrapper))?,
                Role::Replica => replica.add(Arc::new(wrapper))?,
            }
        }

        info!(
            proxy_id = %id,
            primaries = primary.len(),
            replicas = replica.len(),
            primary_strategy = primary.strategy_name(),
            replica_strategy = replica.strategy_name(),
            "proxy built"
        );

        Ok(Proxy {
            id,
            config: self.config,
            primary,
            replica,
            cache: self.cache,
            events: self.events,
        })
    }
}

impl Proxy {
    pub fn builder(config: ProxyConfig) -> ProxyBuilder {
        ProxyBuilder::new(config)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn primary(&self) -> &Pool {
        &self.primary
    }

    pub fn replica(&self) -> &Pool {
        &self.replica
    }

    pub fn pool(&self, role: Role) -> &Pool {
        match role {
            Role::Primary => &self.primary,
            Role::Replica => &self.replica,
        }
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Run a statement on the pool it is routed to
    pub async fn execute(&self, statement: &str) -> RelevoResult<Rows> {
        let route = self.route(statement).await;
        debug!(proxy_id = %self.id, route = %route, "routing statement");
        match route {
            Route::All => {
                self.send_everywhere(|wrapper| async move {
                    wrapper.connection().execute(statement).await
                })
                .await?;
                Ok(Rows::default())
            }
            Route::Primary => {
                self.run_on(Role::Primary, |wrapper| async move {
                    wrapper.connection().execute(statement).await
                })
                .await
            }
            Route::Replica => {
                self.run_on(Role::Replica, |wrapper| async move {
                    wrapper.connection().execute(statement).await
                })
                .await
            }
        }
    }

    /// Call a method by name through the dispatch table
    pub async fn dispatch(&self, method: &str, args: &[String]) -> RelevoResult<Rows> {
        match lookup(method) {
            DispatchKind::Hijacked => {
                let statement = args.first().ok_or_else(|| {
                    RelevoError::validation(format!("{} needs a statement", method))
                })?;
                self.execute(statement).await
            }
            DispatchKind::Broadcast(op) => {
                self.control(op, args).await?;
                Ok(Rows::default())
            }
            DispatchKind::Delegated => {
                trace!(proxy_id = %self.id, method = method, "delegating");
                self.any_connection(|wrapper| async move {
                    wrapper.connection().invoke(method, args).await
                })
                .await
            }
        }
    }

    /// Broadcast a control-plane operation to every connection, replicas first
    pub async fn control(&self, op: ControlOp, args: &[String]) -> RelevoResult<()> {
        info!(proxy_id = %self.id, operation = %op, "broadcasting control operation");
        self.send_everywhere(|wrapper| async move {
            op.apply(wrapper.connection().as_ref(), args).await
        })
        .await
    }

    pub async fn connect(&self) -> RelevoResult<()> {
        self.control(ControlOp::Connect, &[]).await
    }

    pub async fn disconnect(&self) -> RelevoResult<()> {
        self.control(ControlOp::Disconnect, &[]).await
    }

    pub async fn reconnect(&self) -> RelevoResult<()> {
        self.control(ControlOp::Reconnect, &[]).await
    }

    pub async fn verify(&self) -> RelevoResult<()> {
        self.control(ControlOp::Verify, &[]).await
    }

    pub async fn clear_cache(&self) -> RelevoResult<()> {
        self.control(ControlOp::ClearCache, &[]).await
    }

    pub async fn reset(&self) -> RelevoResult<()> {
        self.control(ControlOp::Reset, &[]).await
    }

    /// Pool a statement would be sent to right now.
    ///
    /// Classification has side effects: statements that need the primary make
    /// the unit of work sticky.
    pub async fn route(&self, statement: &str) -> Route {
        if classifier::needed_by_all(statement) {
            return Route::All;
        }
        if classifier::needs_primary(statement) {
            if self.config.sticky && !classifier::skips_stickiness(statement) {
                self.stick_to_primary(true).await;
            }
            return Route::Primary;
        }
        if self.stuck_to_primary() {
            return Route::Primary;
        }
        if self.previously_stuck().await {
            // Honour the earlier window without extending it
            self.stick_to_primary(false).await;
            return Route::Primary;
        }
        if self.replica.is_empty() {
            return Route::Primary;
        }
        if self.replica.completely_blocklisted().await {
            if self.config.sticky {
                self.stick_to_primary(true).await;
            }
            return Route::Primary;
        }
        if self.primary.any_in_transaction() {
            return Route::Primary;
        }
        Route::Replica
    }

    /// Stick the current unit of work to the primary. With `persist`, the
    /// stickiness outlives the unit of work by the configured primary TTL.
    pub async fn stick_to_primary(&self, persist: bool) {
        let ttl = if persist {
            self.config.primary_ttl()
        } else {
            Duration::ZERO
        };
        let session = context::with_current(|record| {
            record.stick(&self.id, ttl);
            record.session_key().map(str::to_string)
        });
        let Some(session) = session else {
            trace!(proxy_id = %self.id, "no unit of work, not sticking");
            return;
        };

        debug!(proxy_id = %self.id, ttl_ms = ttl.as_millis() as u64, "stuck to primary");
        self.events.emit(RouterEvent::StuckToPrimary {
            proxy_id: self.id.clone(),
            ttl,
        });

        if let (Some(cache), Some(session), false) = (&self.cache, session, ttl.is_zero()) {
            if let Err(error) = cache.stick(&session, &self.id, ttl).await {
                warn!(proxy_id = %self.id, error = %error, "failed to persist stickiness");
            }
        }
    }

    /// Drop this proxy's stickiness from the current unit of work
    pub fn release_primary(&self) {
        context::release(&self.id);
    }

    /// True if the current unit of work is stuck to the primary
    pub fn stuck_to_primary(&self) -> bool {
        context::with_current(|record| record.stuck(&self.id)).unwrap_or(false)
    }

    async fn previously_stuck(&self) -> bool {
        let Some((stuck, session)) = context::with_current(|record| {
            (
                record.previously_stuck(&self.id),
                record.session_key().map(str::to_string),
            )
        }) else {
            return false;
        };
        if stuck {
            return true;
        }
        match (&self.cache, session) {
            (Some(cache), Some(session)) => cache.stuck(&session, &self.id).await,
            _ => false,
        }
    }

    /// Take a connection out of rotation until it is restored
    pub fn drain_connection(&self, name: &str) -> RelevoResult<()> {
        self.find_connection(name)?.blocklist_forever("drained");
        Ok(())
    }

    pub fn restore_connection(&self, name: &str) -> RelevoResult<()> {
        self.find_connection(name)?.unblock();
        Ok(())
    }

    pub fn find_connection(&self, name: &str) -> RelevoResult<Arc<ConnectionWrapper>> {
        self.primary
            .connection(name)
            .or_else(|_| self.replica.connection(name))
    }

    /// Run `work` on the pool for `role`, failing a replica call over to the
    /// primary when the replica pool is exhausted
    pub async fn run_on<T, F, Fut>(&self, role: Role, mut work: F) -> RelevoResult<T>
    where
        T: Default,
        F: FnMut(Arc<ConnectionWrapper>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let result = match role {
            Role::Primary => self.primary.provide(&mut work).await,
            Role::Replica => match self.replica.provide(&mut work).await {
                Err(error) if error.is_pool_exhaustion() => {
                    warn!(proxy_id = %self.id, error = %error, "replica pool exhausted, failing over to primary");
                    self.events.emit(RouterEvent::FailedOver { from: Role::Replica });
                    if self.config.sticky && self.replica.completely_blocklisted().await {
                        self.stick_to_primary(true).await;
                    }
                    self.primary.push_blocklist_error(error);
                    self.primary.provide(&mut work).await
                }
                other => other,
            },
        };

        match result {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(error) if error.is_pool_exhaustion() => {
                self.reset_blocklists();
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Run `work` on one connection, primary preferred; the replica pool is
    /// used when the primary pool is disabled or exhausted
    pub async fn any_connection<T, F, Fut>(&self, mut work: F) -> RelevoResult<T>
    where
        T: Default,
        F: FnMut(Arc<ConnectionWrapper>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        if !self.primary.is_disabled() {
            match self.primary.provide(&mut work).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(error) if error.is_pool_exhaustion() => {
                    debug!(proxy_id = %self.id, error = %error, "primary unavailable, delegating to a replica");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(self.replica.provide(&mut work).await?.unwrap_or_default())
    }

    /// Run `work` on every connection, replica pool first so a replica failure
    /// never replays anything on the primary
    async fn send_everywhere<T, F, Fut>(&self, mut work: F) -> RelevoResult<()>
    where
        F: FnMut(Arc<ConnectionWrapper>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        match self.replica.send_to_all(&mut work).await {
            Ok(_) => {}
            Err(RelevoError::NoConnectionsAvailable { .. }) => {
                debug!(proxy_id = %self.id, "no replica available, sending to primary only");
            }
            Err(error) => return Err(error),
        }
        match self.primary.send_to_all(&mut work).await {
            Ok(_) => Ok(()),
            Err(RelevoError::NoConnectionsAvailable { .. }) => {
                warn!(proxy_id = %self.id, "no primary connection available for broadcast");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn reset_blocklists(&self) {
        warn!(proxy_id = %self.id, "both pools exhausted, clearing blocklists");
        self.primary.unblock_all();
        self.replica.unblock_all();
        self.events.emit(RouterEvent::BlocklistReset);
    }
}
