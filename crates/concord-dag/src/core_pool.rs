//! Bounded pool of writer sessions that linger after eviction.

use std::collections::VecDeque;
use std::sync::Arc;

use concord_core::keys::CoreKey;
use concord_core::traits::LogCore;

/// Recently evicted sessions, oldest first. Reopening a lingering writer
/// reuses its session instead of opening a new one.
#[derive(Debug)]
pub struct CorePool {
    capacity: usize,
    lingering: VecDeque<Arc<dyn LogCore>>,
}

impl CorePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lingering: VecDeque::new(),
        }
    }

    /// Keeps `core` around; releases the oldest session past capacity.
    pub fn linger(&mut self, core: Arc<dyn LogCore>) {
        if self.capacity == 0 {
            return;
        }
        let key = core.key();
        self.lingering.retain(|c| c.key() != key);
        self.lingering.push_back(core);
        while self.lingering.len() > self.capacity {
            if let Some(released) = self.lingering.pop_front() {
                tracing::trace!(core = %released.key().short(), "released lingering core");
            }
        }
    }

    /// Takes a lingering session for `key`.
    pub fn take(&mut self, key: &CoreKey) -> Option<Arc<dyn LogCore>> {
        let index = self.lingering.iter().position(|c| c.key() == *key)?;
        self.lingering.remove(index)
    }

}
