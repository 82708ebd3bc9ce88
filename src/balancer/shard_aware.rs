/// Shard-aware selection: one child strategy per shard
use super::{Strategy, StrategyKind};
use crate::context;
use crate::core::{ConnectionWrapper, Role};
use crate::error::{RelevoError, RelevoResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Routes to the child strategy for the shard in scope (see
/// [`context::with_shard`]), falling back to `default_shard`.
pub struct ShardAware {
    role: Role,
    kind: StrategyKind,
    default_shard: Option<String>,
    shuffle: bool,
    shards: HashMap<String, Box<dyn Strategy>>,
}

impl ShardAware {
    pub fn new(
        role: Role,
        kind: StrategyKind,
        default_shard: Option<String>,
        shuffle: bool,
    ) -> Self {
        Self {
            role,
            kind,
            default_shard,
            shuffle,
            shards: HashMap::new(),
        }
    }

    pub fn shard_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.shards.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn resolve(&self) -> RelevoResult<&dyn Strategy> {
        let shard_id = context::current_shard()
            .or_else(|| self.default_shard.clone())
            .unwrap_or_default();
        trace!(role = %self.role, shard = %shard_id, "resolving shard");
        self.shards
            .get(&shard_id)
            .map(|strategy| strategy.as_ref())
            .ok_or(RelevoError::InvalidShard {
                role: self.role,
                shard_id,
            })
    }
}

#[async_trait]
impl Strategy for ShardAware {
    fn connection_added(&mut self, wrapper: Arc<ConnectionWrapper>) -> RelevoResult<()> {
        let shard_id = wrapper.shard_id().map(str::to_string).ok_or_else(|| {
            RelevoError::validation(format!(
                "connection '{}' has no shard_id but its {} pool is shard aware",
                wrapper.name(),
                self.role
            ))
        })?;
        let (kind, shuffle) = (self.kind, self.shuffle);
        self.shards
            .entry(shard_id)
            .or_insert_with(|| kind.build(shuffle))
            .connection_added(wrapper)
    }

    async fn current(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        self.resolve()?.current().await
    }

    async fn next(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        self.resolve()?.next().await
    }

    fn name(&self) -> &'static str {
        "shard_aware"
    }
}
