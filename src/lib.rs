//! Relevo - primary/replica connection router
//!
//! Relevo sits between application query calls and a set of database
//! connections. For every statement it decides whether the primary must run
//! it or a replica may, keeps failing connections out of rotation for a
//! while, and pins a unit of work to the primary after it writes so it never
//! reads its own writes back from a lagging replica.
//!
//! ```no_run
//! use relevo::{Proxy, ProxyConfig, UnitOfWork};
//! # use relevo::{Connection, RelevoResult};
//! # use std::sync::Arc;
//! # async fn run(open: impl Fn(&str) -> Arc<dyn Connection>) -> RelevoResult<()> {
//! let config = ProxyConfig::load_from_file("relevo.toml")?;
//! let proxy = Proxy::builder(config).build(|name, _entry| Ok(open(name)))?;
//!
//! let request = UnitOfWork::from_cookie(None);
//! request
//!     .scope(async {
//!         proxy.execute("INSERT INTO posts (title) VALUES ('hello')").await?;
//!         // Stuck to the primary for the rest of the request
//!         proxy.execute("SELECT * FROM posts").await
//!     })
//!     .await?;
//! if let Some(cookie) = request.commit() {
//!     println!("Set-Cookie: {}", cookie.to_set_cookie());
//! }
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod classifier;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod events;
pub mod health;
pub mod proxy;
pub mod utils;

pub use balancer::{PriorityFailover, RoundRobin, ShardAware, Strategy, StrategyKind};
pub use classifier::{classify, needed_by_all, needs_primary, skips_stickiness, Route};
pub use config::{ConnectionConfig, ProxyConfig};
pub use context::{
    cookie_from_header, current_shard, with_shard, CacheStickiness, CacheStore, CookieOptions,
    MemoryCache, StickyCookie, UnitOfWork, COOKIE_NAME,
};
pub use core::{
    Clock, Connection, ConnectionWrapper, ManualClock, Pool, Role, Row, Rows, SystemClock,
};
pub use error::{
    CacheError, ConfigError, DriverError, DriverErrorKind, ErrorSeverity, RelevoError,
    RelevoResult,
};
pub use events::{EventRegistry, ObserverId, RouterEvent};
pub use health::{ErrorHandler, ErrorMatcher, ErrorVerdict};
pub use proxy::{ControlOp, DispatchKind, Proxy, ProxyBuilder};
