/// The stickiness record of one unit of work
use crate::core::Clock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Furthest ahead an entry may expire, in seconds
pub const MAX_STICKY_SECS: f64 = 86_400.0;

/// Which proxies are stuck to their primary, and until when (epoch seconds).
///
/// `previous` is what the unit of work started with (a cookie from the prior
/// request, for example). `current` holds entries stuck during this unit of
/// work; they stay in force until the unit of work ends, whatever their TTL,
/// and only entries with a TTL outlive it.
pub struct StickinessContext {
    previous: HashMap<String, f64>,
    current: HashMap<String, f64>,
    /// Last connection served per pool key, for in-pool stickiness
    pins: HashMap<String, String>,
    had_state: bool,
    session_key: Option<String>,
    clock: Arc<dyn Clock>,
}

/// Entries to carry into the next unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedState {
    /// Live entries, sorted by proxy id
    pub entries: BTreeMap<String, f64>,
    /// True if an outbound transport must be written even when `entries` is
    /// empty, so stale state on the other side gets cleared
    pub must_write: bool,
}

impl StickinessContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            previous: HashMap::new(),
            current: HashMap::new(),
            pins: HashMap::new(),
            had_state: false,
            session_key: None,
            clock,
        }
    }

    /// Start from a serialized `id:timestamp|id:timestamp` record
    pub fn init(serialized: Option<&str>, clock: Arc<dyn Clock>) -> Self {
        let mut context = Self::new(clock);
        let Some(serialized) = serialized.map(str::trim).filter(|s| !s.is_empty()) else {
            return context;
        };
        context.had_state = true;
        let now = context.clock.now_secs();
        for (proxy_id, stuck_until) in parse(serialized) {
            if stuck_until > now && stuck_until <= now + MAX_STICKY_SECS {
                context.previous.insert(proxy_id, stuck_until);
            } else if stuck_until > now {
                trace!(proxy_id = %proxy_id, stuck_until, "dropping entry past the sticky horizon");
            }
        }
        trace!(entries = context.previous.len(), "stickiness record initialised");
        context
    }

    pub fn set_session_key(&mut self, key: Option<String>) {
        self.session_key = key;
    }

    /// Key used by the cache transport for cookie-less units of work
    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    /// Stuck during this unit of work
    pub fn stuck(&self, proxy_id: &str) -> bool {
        self.current.contains_key(proxy_id)
    }

    /// Stuck by an earlier unit of work, and still live
    pub fn previously_stuck(&self, proxy_id: &str) -> bool {
        self.previous
            .get(proxy_id)
            .map_or(false, |&until| until > self.clock.now_secs())
    }

    /// Stick for the rest of this unit of work, and for `ttl` beyond it.
    /// A zero TTL never outlives the unit of work; TTLs are capped at
    /// [`MAX_STICKY_SECS`].
    pub fn stick(&mut self, proxy_id: &str, ttl: Duration) {
        let until = self.clock.now_secs() + ttl.as_secs_f64().min(MAX_STICKY_SECS);
        let entry = self.current.entry(proxy_id.to_string()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
        self.had_state = true;
    }

    pub fn release(&mut self, proxy_id: &str) {
        let removed_previous = self.previous.remove(proxy_id).is_some();
        let removed_current = self.current.remove(proxy_id).is_some();
        if removed_previous || removed_current {
            self.had_state = true;
        }
        self.pins.retain(|key, _| !key.starts_with(&format!("{}/", proxy_id)));
    }

    pub fn release_all(&mut self) {
        if !self.previous.is_empty() || !self.current.is_empty() {
            self.had_state = true;
        }
        self.previous.clear();
        self.current.clear();
        self.pins.clear();
    }

    pub fn pinned(&self, pool_key: &str) -> Option<&str> {
        self.pins.get(pool_key).map(String::as_str)
    }

    pub fn pin(&mut self, pool_key: &str, connection: &str) {
        self.pins
            .insert(pool_key.to_string(), connection.to_string());
    }

    /// Live entries to hand to the outbound transport
    pub fn commit(&self) -> CommittedState {
        let now = self.clock.now_secs();
        let mut entries = BTreeMap::new();
        for (proxy_id, &until) in self.previous.iter().chain(self.current.iter()) {
            if until <= now {
                continue;
            }
            let entry = entries.entry(proxy_id.clone()).or_insert(until);
            if until > *entry {
                *entry = until;
            }
        }
        CommittedState {
            must_write: self.had_state || !entries.is_empty(),
            entries,
        }
    }
}

/// Serialize entries as `id:timestamp|id:timestamp`
pub fn serialize(entries: &BTreeMap<String, f64>) -> String {
    entries
        .iter()
        .map(|(proxy_id, until)| format!("{}:{:.3}", proxy_id, until))
        .collect::<Vec<_>>()
        .join("|")
}

/// Parse `id:timestamp|id:timestamp`, skipping malformed pairs
pub fn parse(serialized: &str) -> Vec<(String, f64)> {
    serialized
        .split('|')
        .filter_map(|pair| {
            let (proxy_id, until) = pair.split_once(':')?;
            let until: f64 = until.trim().parse().ok()?;
            let proxy_id = proxy_id.trim();
            (!proxy_id.is_empty() && until.is_finite()).then(|| (proxy_id.to_string(), until))
        })
        .collect()
}
