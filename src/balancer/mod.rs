/// Selection strategies for picking a connection within a pool
///
/// - `RoundRobin`: weighted rotation, skipping blocklisted connections
/// - `PriorityFailover`: always the highest-weight connection still available
/// - `ShardAware`: one child strategy per shard id, chosen by the task's shard scope
pub mod failover;
pub mod round_robin;
pub mod shard_aware;

pub use failover::PriorityFailover;
pub use round_robin::RoundRobin;
pub use shard_aware::ShardAware;

use crate::core::{ConnectionWrapper, Role};
use crate::error::RelevoResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Selection strategy trait
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Build-time hook, called once per connection in configuration order
    fn connection_added(&mut self, wrapper: Arc<ConnectionWrapper>) -> RelevoResult<()>;

    /// The current selection if it is still usable; does not move the cursor
    async fn current(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>>;

    /// Advance to the next usable connection; `None` when all are blocklisted
    async fn next(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>>;

    fn name(&self) -> &'static str;
}

/// Built-in strategy kinds selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Failover,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Failover => "failover",
        }
    }

    /// Build an empty strategy of this kind
    pub fn build(&self, shuffle: bool) -> Box<dyn Strategy> {
        match self {
            StrategyKind::RoundRobin => Box::new(RoundRobin::new(shuffle)),
            StrategyKind::Failover => Box::new(PriorityFailover::new()),
        }
    }

    /// Build an empty strategy, wrapped for sharding when requested
    pub fn build_for_pool(
        &self,
        role: Role,
        shard_aware: bool,
        default_shard: Option<String>,
        shuffle: bool,
    ) -> Box<dyn Strategy> {
        if shard_aware {
            Box::new(ShardAware::new(role, *self, default_shard, shuffle))
        } else {
            self.build(shuffle)
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "round_robin" | "roundrobin" => Ok(StrategyKind::RoundRobin),
            "failover" | "priority_failover" => Ok(StrategyKind::Failover),
            other => Err(format!(
                "unknown strategy '{}': expected round_robin or failover",
                other
            )),
        }
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}
