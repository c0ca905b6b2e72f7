//! Operations an application may perform from inside `apply`.

use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::WriterKey;
use concord_core::models::{SystemInfo, WriterInfo};

use crate::handlers::AddWriterOptions;

/// Mutable view of the system snapshot while one group is applied.
#[derive(Debug)]
pub struct ApplyHost<'a> {
    info: &'a mut SystemInfo,
    indexers_changed: bool,
    membership_changed: bool,
}

impl<'a> ApplyHost<'a> {
    pub fn new(info: &'a mut SystemInfo) -> Self {
        Self {
            info,
            indexers_changed: false,
            membership_changed: false,
        }
    }

    /// Adds or re-activates `key`. With `indexer` set it also becomes an
    /// indexer; an existing indexer is never demoted here.
    pub fn add_writer(&mut self, key: WriterKey, options: AddWriterOptions) -> BaseResult<()> {
        let writer = self.info.writers.entry(key).or_insert_with(WriterInfo::default);
        let reactivated = writer.is_removed;
        writer.is_removed = false;
        if options.indexer && !writer.is_indexer {
            writer.is_indexer = true;
            if let Err(pos) = self.info.indexers.binary_search(&key) {
                self.info.indexers.insert(pos, key);
            }
            self.indexers_changed = true;
        }
        self.membership_changed = true;
        tracing::debug!(
            writer = %key.short(),
            indexer = options.indexer,
            reactivated,
            "writer added"
        );
        Ok(())
    }

    /// Marks `key` removed and demotes it. The sole indexer cannot be
    /// removed.
    pub fn remove_writer(&mut self, key: &WriterKey) -> BaseResult<()> {
        if !self.info.is_member(key) {
            return Ok(());
        }
        if !self.info.is_removable(key) {
            return Err(BaseError::LastIndexer { key: key.to_hex() });
        }
        if let Some(writer) = self.info.writers.get_mut(key) {
            writer.is_removed = true;
            writer.is_indexer = false;
        }
        if let Ok(pos) = self.info.indexers.binary_search(key) {
            self.info.indexers.remove(pos);
            self.indexers_changed = true;
        }
        self.membership_changed = true;
        tracing::debug!(writer = %key.short(), "writer removed");
        Ok(())
    }

    /// The error to return from `apply` to abort the batch.
    pub fn interrupt(&self, reason: impl Into<String>) -> BaseError {
        BaseError::Interrupted {
            reason: Some(reason.into()),
        }
    }

    pub fn is_member(&self, key: &WriterKey) -> bool {
        self.info.is_member(key)
    }

    pub fn is_indexer(&self, key: &WriterKey) -> bool {
        self.info.is_indexer(key)
    }

    pub fn is_removable(&self, key: &WriterKey) -> bool {
        self.info.is_removable(key)
    }

    pub fn indexers(&self) -> &[WriterKey] {
        &self.info.indexers
    }

    /// Whether this host changed the indexer set.
    pub fn indexers_changed(&self) -> bool {
        self.indexers_changed
    }

    pub fn membership_changed(&self) -> bool {
        self.membership_changed
    }
}
