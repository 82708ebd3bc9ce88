/// Per-unit-of-work state: primary stickiness and shard scope
///
/// A unit of work (an HTTP request, a background job) runs inside
/// [`UnitOfWork::scope`]. Proxies called from inside the scope share one
/// [`StickinessContext`]; outside any scope stickiness is a no-op and every
/// call is routed on its own merits.
pub mod cache;
pub mod cookie;
pub mod record;

pub use cache::{CacheStickiness, CacheStore, MemoryCache};
pub use cookie::{cookie_from_header, CookieOptions, StickyCookie, COOKIE_NAME};
pub use record::{CommittedState, StickinessContext, MAX_STICKY_SECS};

use crate::core::{Clock, SystemClock};
use crate::utils::generate_id;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

tokio::task_local! {
    static UNIT_OF_WORK: Arc<Mutex<StickinessContext>>;
    static SHARD_ID: String;
}

/// Handle on one unit of work's stickiness record
#[derive(Clone)]
pub struct UnitOfWork {
    id: String,
    context: Arc<Mutex<StickinessContext>>,
    clock: Arc<dyn Clock>,
    cookie_options: CookieOptions,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::from_cookie(None)
    }

    /// Start from the value of an inbound stickiness cookie
    pub fn from_cookie(value: Option<&str>) -> Self {
        Self::from_cookie_with_clock(value, Arc::new(SystemClock))
    }

    pub fn from_cookie_with_clock(value: Option<&str>, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: generate_id("uow"),
            context: Arc::new(Mutex::new(StickinessContext::init(value, Arc::clone(&clock)))),
            clock,
            cookie_options: CookieOptions::default(),
        }
    }

    /// Session key for the cache transport
    pub fn with_session_key<S: Into<String>>(self, key: S) -> Self {
        self.context.lock().set_session_key(Some(key.into()));
        self
    }

    pub fn with_cookie_options(mut self, options: CookieOptions) -> Self {
        self.cookie_options = options;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `fut` inside this unit of work
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        trace!(unit_of_work = %self.id, "entering unit of work");
        UNIT_OF_WORK.scope(Arc::clone(&self.context), fut).await
    }

    pub fn stuck(&self, proxy_id: &str) -> bool {
        self.context.lock().stuck(proxy_id)
    }

    pub fn previously_stuck(&self, proxy_id: &str) -> bool {
        self.context.lock().previously_stuck(proxy_id)
    }

    /// Live entries to carry forward
    pub fn committed(&self) -> CommittedState {
        self.context.lock().commit()
    }

    /// Outbound cookie, or `None` when the client's cookie needs no change
    pub fn commit(&self) -> Option<StickyCookie> {
        let state = self.committed();
        StickyCookie::from_committed(&state, self.clock.now_secs(), &self.cookie_options)
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` against the current unit of work's record, if there is one
pub(crate) fn with_current<R>(f: impl FnOnce(&mut StickinessContext) -> R) -> Option<R> {
    UNIT_OF_WORK.try_with(|context| f(&mut context.lock())).ok()
}

pub fn in_unit_of_work() -> bool {
    UNIT_OF_WORK.try_with(|_| ()).is_ok()
}

/// Stick `proxy_id` to its primary from inside a unit of work
pub fn stick(proxy_id: &str, ttl: Duration) -> bool {
    let stuck = with_current(|context| context.stick(proxy_id, ttl)).is_some();
    if !stuck {
        trace!(proxy_id = proxy_id, "no unit of work, stickiness skipped");
    }
    stuck
}

pub fn release(proxy_id: &str) {
    with_current(|context| context.release(proxy_id));
}

pub fn release_all() {
    with_current(|context| context.release_all());
}

/// Run `fut` with `shard` as the shard for shard-aware pools
pub async fn with_shard<S: Into<String>, F: Future>(shard: S, fut: F) -> F::Output {
    SHARD_ID.scope(shard.into(), fut).await
}

pub fn current_shard() -> Option<String> {
    SHARD_ID.try_with(|shard| shard.clone()).ok()
}
