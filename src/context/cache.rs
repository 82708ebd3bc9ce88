/// Cache transport for stickiness when no cookie can travel with the unit of work
use crate::core::{Clock, SystemClock};
use crate::error::{CacheError, RelevoError, RelevoResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default budget for a single cache call
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(100);

/// Key/value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// In-process store, mostly for tests and single-node deployments
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, u64)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn read(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        let expires = self
            .clock
            .now_millis()
            .saturating_add(ttl.as_millis() as u64);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }
}

/// Stickiness records kept in a [`CacheStore`], keyed by session and proxy.
///
/// Reads fail open: an error or timeout counts as "not stuck".
#[derive(Clone)]
pub struct CacheStickiness {
    store: Arc<dyn CacheStore>,
    namespace: String,
    timeout: Duration,
}

impl CacheStickiness {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            namespace: String::new(),
            timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    /// Prefix for every key; include a separator if one is wanted
    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn key(&self, session: &str, proxy_id: &str) -> String {
        format!("{}relevo::{}-{}", self.namespace, session, proxy_id)
    }

    /// Record that `session` is stuck to the primary of `proxy_id` for `ttl`
    pub async fn stick(&self, session: &str, proxy_id: &str, ttl: Duration) -> RelevoResult<()> {
        let key = self.key(session, proxy_id);
        match tokio::time::timeout(self.timeout, self.store.write(&key, "1", ttl)).await {
            Ok(result) => result.map_err(RelevoError::from),
            Err(_) => Err(RelevoError::timeout(format!("cache write {}", key))),
        }
    }

    pub async fn stuck(&self, session: &str, proxy_id: &str) -> bool {
        let key = self.key(session, proxy_id);
        match tokio::time::timeout(self.timeout, self.store.read(&key)).await {
            Ok(Ok(value)) => value.is_some(),
            Ok(Err(error)) => {
                warn!(key = %key, error = %error, "stickiness cache read failed");
                false
            }
            Err(_) => {
                debug!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "stickiness cache read timed out");
                false
            }
        }
    }
}
