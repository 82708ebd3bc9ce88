/// Weighted round-robin selection
use super::Strategy;
use crate::core::ConnectionWrapper;
use crate::error::RelevoResult;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Each connection appears `weight` times in the rotation.
///
/// With `shuffle` on, the rotation order and starting point are randomised as
/// connections are added, so proxies started together do not hit the same
/// replica in lockstep.
pub struct RoundRobin {
    weighted: Vec<Arc<ConnectionWrapper>>,
    current_idx: AtomicUsize,
    shuffle: bool,
}

impl RoundRobin {
    pub fn new(shuffle: bool) -> Self {
        Self {
            weighted: Vec::new(),
            current_idx: AtomicUsize::new(0),
            shuffle,
        }
    }

    /// Length of the flattened rotation
    pub fn slots(&self) -> usize {
        self.weighted.len()
    }

    async fn safe_value(&self, idx: usize) -> Option<Arc<ConnectionWrapper>> {
        let wrapper = self.weighted.get(idx)?;
        if wrapper.blocklisted().await {
            return None;
        }
        Some(Arc::clone(wrapper))
    }
}

#[async_trait]
impl Strategy for RoundRobin {
    fn connection_added(&mut self, wrapper: Arc<ConnectionWrapper>) -> RelevoResult<()> {
        for _ in 0..wrapper.weight() {
            self.weighted.push(Arc::clone(&wrapper));
        }
        if self.shuffle && !self.weighted.is_empty() {
            let mut rng = rand::thread_rng();
            self.weighted.shuffle(&mut rng);
            self.current_idx
                .store(rng.gen_range(0..self.weighted.len()), Ordering::Relaxed);
        }
        Ok(())
    }

    async fn current(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        let idx = self.current_idx.load(Ordering::Relaxed);
        Ok(self.safe_value(idx).await)
    }

    async fn next(&self) -> RelevoResult<Option<Arc<ConnectionWrapper>>> {
        let len = self.weighted.len();
        match len {
            0 => return Ok(None),
            1 => return Ok(self.safe_value(0).await),
            _ => {}
        }

        let start = self.current_idx.load(Ordering::Relaxed) % len;
        let mut idx = start;
        loop {
            idx = (idx + 1) % len;
            if idx == start {
                // Full loop: the starting slot is the last candidate
                return Ok(self.safe_value(idx).await);
            }
            if let Some(wrapper) = self.safe_value(idx).await {
                self.current_idx.store(idx, Ordering::Relaxed);
                return Ok(Some(wrapper));
            }
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
