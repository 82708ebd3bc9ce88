/// Priority failover selection
use super::Strategy;
use crate::core::ConnectionWrapper;
use crate::error::RelevoResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Connections ordered by descending weight; equal weights keep configuration
/// order. Selection always returns the first connection that is not
/// blocklisted, so traffic moves back to a preferred node as soon as it recovers.
#[derive(Default)]
pub struct PriorityFailover {
    ordered: Vec<Arc<ConnectionWrapper>>,
}

impl PriorityFailover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection names in priority order
    pub fn order(&self) -> Vec<&str> {
        self.ordered.iter().map(|w| w.name()).collect()
    }

    async fn first_available(&self) -> Option<Arc<ConnectionWrapper>> {
        for wrapper in &self.ordered {
            if !wrapper.blocklisted().await {
                return Some(Arc::clone(wrapper));
            }
        }
        None
    }
}

#[async_trait]
impl Strategy for PriorityFailover {
    fn connection_added(&mut self, wrapper: Arc<ConnectionWrapper>) -> RelevoResult<()> {
        self.ordered.push(wrapper);
        // Stable sort keeps insertion order among equal weights
        self.ordered.sort_by(|a, b| b.weight().cmp(&a.weight()));
        Ok(())
    }

    async fn current(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        Ok(self.first_available().await)
    }

    async fn next(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        Ok(self.first_available().await)
    }

    fn name(&self) -> &'static str {
        "failover"
    }
}
