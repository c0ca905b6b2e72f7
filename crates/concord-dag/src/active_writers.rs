//! Registry of the writers one base instance currently tracks.

use std::collections::BTreeMap;
use std::sync::Arc;

use concord_core::keys::WriterKey;
use concord_core::traits::LogCore;

use crate::core_pool::CorePool;
use crate::writer::Writer;

/// Writers keyed (and iterated) in key order. Evicted writers leave their
/// session in the pool for reuse.
#[derive(Debug)]
pub struct ActiveWriterSet {
    writers: BTreeMap<WriterKey, Writer>,
    pool: CorePool,
}

impl ActiveWriterSet {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            writers: BTreeMap::new(),
            pool: CorePool::new(pool_capacity),
        }
    }

    pub fn get(&self, key: &WriterKey) -> Option<&Writer> {
        self.writers.get(key)
    }

    pub fn get_mut(&mut self, key: &WriterKey) -> Option<&mut Writer> {
        self.writers.get_mut(key)
    }

    pub fn contains(&self, key: &WriterKey) -> bool {
        self.writers.contains_key(key)
    }

    pub fn insert(&mut self, writer: Writer) {
        self.writers.insert(writer.key(), writer);
    }

    /// A lingering session for `key`, if one was evicted recently.
    pub fn reuse_core(&mut self, key: &WriterKey) -> Option<Arc<dyn LogCore>> {
        self.pool.take(&key.core_key())
    }

    /// Closes a writer, lingering its session.
    pub fn evict(&mut self, key: &WriterKey) -> Option<Writer> {
        let writer = self.writers.remove(key)?;
        self.pool.linger(writer.core().clone());
        tracing::debug!(writer = %key.short(), "evicted writer");
        Some(writer)
    }

    /// Evicts every writer.
    pub fn clear(&mut self) {
        let keys: Vec<WriterKey> = self.writers.keys().copied().collect();
        for key in keys {
            self.evict(&key);
        }
    }

    pub fn keys(&self) -> Vec<WriterKey> {
        self.writers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Writer> {
        self.writers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Writer> {
        self.writers.values_mut()
    }
}
