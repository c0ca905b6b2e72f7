//! The drain loop.
//!
//! One drain merges whatever remote and local nodes are available into
//! the linearizer, applies every batch it confirms and repeats until
//! nothing changes. Only the drain touches [`DrainState`], and at most one
//! drain runs at a time.

use std::collections::BTreeSet;

use concord_apply::{find_checkpoint, ApplyOutcome, ApplyState, Handlers};
use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::{Checkpoint, SystemInfo};
use concord_core::traits::{CoreOptions, LogCore};
use concord_dag::writer::WriterFlags;
use concord_dag::{ActiveWriterSet, LinearizedBatch, Linearizer, Writer};
use tracing::Instrument;

use crate::base::Inner;
use crate::events::BaseEvent;
use crate::wakeup::{writers_to_wake, WakeupHints};

/// State owned by the drain.
pub(crate) struct DrainState<H: Handlers> {
    pub(crate) apply: ApplyState<H>,
    pub(crate) linearizer: Linearizer,
    pub(crate) writers: ActiveWriterSet,
    pub(crate) fast_forward_to: Option<Checkpoint>,
    /// The current drain changed linearized or applied state.
    pub(crate) updating: bool,
    /// Drains since the local writer last grew.
    pub(crate) ack_tick: u64,
    pub(crate) writable: bool,
    pub(crate) is_indexer: bool,
}

impl<H: Handlers> DrainState<H> {
    pub(crate) fn new(
        apply: ApplyState<H>,
        local_key: WriterKey,
        local_core: std::sync::Arc<dyn LogCore>,
        pool_size: usize,
        fast_forward_to: Option<Checkpoint>,
    ) -> Self {
        let linearizer = build_linearizer(&apply, local_key);
        let info = apply.system();
        let flags = writer_flags(info, &linearizer, local_key, local_key);
        let mut writers = ActiveWriterSet::new(pool_size);
        writers.insert(Writer::new(
            local_key,
            local_core,
            linearizer.merged_length(&local_key),
            flags,
        ));
        let writable = info.is_member(&local_key);
        let is_indexer = info.is_indexer(&local_key);
        Self {
            apply,
            linearizer,
            writers,
            fast_forward_to,
            updating: false,
            ack_tick: 0,
            writable,
            is_indexer,
        }
    }
}

/// A linearizer resuming from the committed system, also tracking the
/// local writer.
fn build_linearizer<H: Handlers>(apply: &ApplyState<H>, local_key: WriterKey) -> Linearizer {
    let info = apply.system();
    let mut linearizer = apply.catchup();
    linearizer.add_writer(
        local_key,
        info.writer_length(&local_key),
        info.writer_height(&local_key),
    );
    linearizer
}

fn writer_flags(
    info: &SystemInfo,
    linearizer: &Linearizer,
    key: WriterKey,
    local_key: WriterKey,
) -> WriterFlags {
    WriterFlags {
        is_indexer: info.is_indexer(&key),
        is_bootstrap: linearizer.bootstrap_writers().contains(&key),
        is_removed: info.writer(&key).is_some_and(|w| w.is_removed),
        is_local: key == local_key,
    }
}

/// Pending local appends.
///
/// Values queued between two drains form one batch, identified by an
/// epoch. An ack queued behind anything is dropped and a queued ack is
/// replaced by the next value: values advance visibility too.
#[derive(Debug)]
pub(crate) struct Intents {
    pending: Vec<Option<Vec<u8>>>,
    epoch: u64,
    flushed: u64,
    rejected: BTreeSet<u64>,
    pub(crate) hints: WakeupHints,
    pub(crate) check_fast_forward: bool,
}

impl Intents {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
            epoch: 1,
            flushed: 0,
            rejected: BTreeSet::new(),
            hints: WakeupHints::default(),
            check_fast_forward: false,
        }
    }

    fn push(&mut self, value: Option<Vec<u8>>) {
        if !self.pending.is_empty() {
            if value.is_none() {
                return;
            }
            if matches!(self.pending.last(), Some(None)) {
                self.pending.pop();
            }
        }
        self.pending.push(value);
    }

    /// Queues `values`, returning the epoch of the batch they joined.
    pub(crate) fn queue(&mut self, values: Vec<Option<Vec<u8>>>) -> u64 {
        for value in values {
            self.push(value);
        }
        self.epoch
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn take(&mut self) -> Option<(u64, Vec<Option<Vec<u8>>>)> {
        if self.pending.is_empty() {
            return None;
        }
        let epoch = self.epoch;
        self.epoch += 1;
        Some((epoch, std::mem::take(&mut self.pending)))
    }

    fn settle(&mut self, epoch: u64, accepted: bool) {
        self.flushed = self.flushed.max(epoch);
        if !accepted {
            self.rejected.insert(epoch);
        }
    }

    /// `Some(accepted)` once the batch of `epoch` left the queue.
    pub(crate) fn outcome(&mut self, epoch: u64) -> Option<bool> {
        (self.flushed >= epoch).then(|| !self.rejected.remove(&epoch))
    }
}

impl<H: Handlers> Inner<H> {
    /// Runs the drain loop to a fixed point.
    pub(crate) async fn drain(&self, st: &mut DrainState<H>) -> BaseResult<()> {
        let (hints, check_fast_forward) = {
            let mut intents = self.intents();
            let check = std::mem::take(&mut intents.check_fast_forward);
            (intents.hints.take(), check)
        };
        if check_fast_forward && st.fast_forward_to.is_none() {
            st.fast_forward_to = self.find_fast_forward(st)?;
        }
        self.refresh_writers(st, hints)?;

        loop {
            if self.is_closing() || self.is_paused() {
                return Ok(());
            }
            if let Some(checkpoint) = st.fast_forward_to.take() {
                self.apply_fast_forward(st, checkpoint)?;
                continue;
            }

            let remote_added = self.add_remote_heads(st)?;
            let local_added = self.add_local_heads(st)?;
            if remote_added > 0 || local_added > 0 {
                st.updating = true;
            }

            let Some(batch) = st.linearizer.update() else {
                if st.apply.should_flush() {
                    st.apply.flush()?;
                }
                if remote_added >= self.config.drain.remote_add_batch {
                    continue;
                }
                break;
            };
            if self.is_closing() {
                return Ok(());
            }

            let outcome = self.apply_batch(st, &batch).await?;
            if outcome.indexers_updated {
                self.migrate(st)?;
            } else if outcome.membership_changed {
                self.refresh_writers(st, Default::default())?;
            }
        }

        self.gc_writers(st);
        Ok(())
    }

    async fn apply_batch(
        &self,
        st: &mut DrainState<H>,
        batch: &LinearizedBatch,
    ) -> BaseResult<ApplyOutcome> {
        let span = crate::apply_span!(batch.start, batch.nodes.len());
        let outcome = st.apply.update(batch).instrument(span).await?;
        for node in &batch.nodes[..outcome.applied] {
            if let Some(writer) = st.writers.get_mut(&node.writer) {
                writer.shift(node.seq);
            }
        }
        st.updating = true;
        Ok(outcome)
    }

    /// Moves the views onto the new indexer set and restarts linearization
    /// from the committed system.
    fn migrate(&self, st: &mut DrainState<H>) -> BaseResult<()> {
        let span = crate::migrate_span!(st.apply.system().indexers.len());
        let _guard = span.enter();
        let key = st.apply.migrate()?;
        tracing::info!(system = %key.short(), "indexer set changed");
        self.rebuild(st)
    }

    /// Replaces the linearizer with one built from the committed system and
    /// rewinds every open writer to its linearized length.
    fn rebuild(&self, st: &mut DrainState<H>) -> BaseResult<()> {
        st.linearizer = build_linearizer(&st.apply, self.local_key);
        let info = st.apply.system();
        for key in st.writers.keys() {
            if !st.linearizer.has_writer(&key) {
                st.linearizer
                    .add_writer(key, info.writer_length(&key), info.writer_height(&key));
            }
        }
        for writer in st.writers.iter_mut() {
            writer.reset(st.linearizer.merged_length(&writer.key()));
        }
        self.refresh_writers(st, Default::default())
    }

    fn find_fast_forward(&self, st: &DrainState<H>) -> BaseResult<Option<Checkpoint>> {
        let config = &self.config.fast_forward;
        if !config.enabled {
            return Ok(None);
        }
        let preferred = config.key.as_deref().map(CoreKey::from_hex).transpose()?;
        find_checkpoint(
            self.store.as_ref(),
            &self.bootstrap,
            self.encryption_key,
            st.apply.indexed_length(),
            config.minimum,
            preferred,
        )
    }

    fn apply_fast_forward(&self, st: &mut DrainState<H>, checkpoint: Checkpoint) -> BaseResult<()> {
        let from = st.apply.indexed_length();
        let span = crate::fast_forward_span!(from, checkpoint.length);
        let _guard = span.enter();
        match st.apply.adopt(&checkpoint) {
            Ok(()) => {}
            Err(BaseError::FastForward { reason }) => {
                tracing::warn!(%reason, "fast-forward skipped");
                self.events.emit(BaseEvent::Warning { message: reason });
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.rebuild(st)?;
        st.updating = true;
        self.events.emit(BaseEvent::FastForward {
            from,
            to: checkpoint.length,
        });
        Ok(())
    }

    /// Opens the writers that must be tracked (bootstraps, indexers, the
    /// local writer) and those with data to read, then refreshes flags.
    fn refresh_writers(
        &self,
        st: &mut DrainState<H>,
        hints: std::collections::BTreeMap<WriterKey, Option<u64>>,
    ) -> BaseResult<()> {
        let info = st.apply.system().clone();
        let mut keys = st.linearizer.bootstrap_writers();
        keys.extend(info.indexers.iter().copied());
        keys.extend(writers_to_wake(
            hints,
            self.store.as_ref(),
            &info,
            &st.writers,
            &st.linearizer,
        )?);
        for key in keys {
            self.ensure_writer(st, key, 0)?;
        }
        for writer in st.writers.iter_mut() {
            writer.flags = writer_flags(&info, &st.linearizer, writer.key(), self.local_key);
        }
        Ok(())
    }

    /// Opens `key` unless it is open. Returns whether it was opened.
    fn ensure_writer(&self, st: &mut DrainState<H>, key: WriterKey, depth: u32) -> BaseResult<bool> {
        if let Some(writer) = st.writers.get_mut(&key) {
            writer.seen(depth);
            return Ok(false);
        }
        let info = st.apply.system();
        if !st.linearizer.has_writer(&key) {
            st.linearizer
                .add_writer(key, info.writer_length(&key), info.writer_height(&key));
        }
        let flags = writer_flags(info, &st.linearizer, key, self.local_key);
        let core = match st.writers.reuse_core(&key) {
            Some(core) => core,
            None => self
                .store
                .open_core(&key.core_key(), &CoreOptions::writer(self.encryption_key))?,
        };
        let mut writer = Writer::new(key, core, st.linearizer.merged_length(&key), flags);
        writer.seen(depth);
        st.writers.insert(writer);
        tracing::debug!(writer = %key.short(), depth, "opened writer");
        Ok(true)
    }

    /// Merges complete groups of remote writers whose dependencies are
    /// known, at most `remote_add_batch` nodes per call.
    fn add_remote_heads(&self, st: &mut DrainState<H>) -> BaseResult<usize> {
        let limit = self.config.drain.remote_add_batch.max(1);
        let mut added = 0;
        while added < limit {
            for writer in st.writers.iter_mut() {
                writer.update()?;
            }

            let mut advanced = 0;
            let mut wanted = Vec::new();
            for key in st.writers.keys() {
                let Some(writer) = st.writers.get_mut(&key) else {
                    continue;
                };
                let Some(size) = writer.ready_group() else {
                    continue;
                };
                let linearizer = &st.linearizer;
                let missing = writer.missing_dependencies(|id| linearizer.contains(id));
                if !missing.is_empty() {
                    wanted.extend(missing.into_iter().map(|id| id.writer));
                    continue;
                }
                for _ in 0..size {
                    if let Some(node) = writer.advance() {
                        st.linearizer.add_head(node)?;
                    }
                }
                advanced += size;
            }

            wanted.sort();
            wanted.dedup();
            let mut opened = false;
            for key in wanted {
                opened |= self.ensure_writer(st, key, 1)?;
            }
            if advanced == 0 && !opened {
                break;
            }
            added += advanced;
        }
        Ok(added)
    }

    /// Turns the queued local values into one co-appended group on top of
    /// the current frontier.
    fn add_local_heads(&self, st: &mut DrainState<H>) -> BaseResult<usize> {
        let local = self.local_key;
        if !st.writers.get(&local).is_some_and(Writer::idle) {
            return Ok(0);
        }
        let Some((epoch, values)) = self.intents().take() else {
            return Ok(0);
        };
        if !st.apply.system().is_member(&local) {
            let has_values = values.iter().any(Option::is_some);
            if has_values {
                tracing::warn!(count = values.len(), "dropping appends of a non-member writer");
            }
            self.intents().settle(epoch, !has_values);
            return Ok(0);
        }

        let heads = st.linearizer.get_heads();
        let height = st.linearizer.next_height(&local, &heads);
        let Some(writer) = st.writers.get_mut(&local) else {
            return Ok(0);
        };
        let nodes = writer.append(values, heads, height)?;
        let count = nodes.len();
        for node in nodes {
            st.linearizer.add_head(node)?;
        }
        self.intents().settle(epoch, true);
        self.wakeup.broadcast(&st.linearizer.get_heads());
        tracing::debug!(count, height, "appended local nodes");
        Ok(count)
    }

    /// Evicts flushed writers that are not needed for quorum.
    fn gc_writers(&self, st: &mut DrainState<H>) {
        let info = st.apply.system();
        let bootstraps = st.linearizer.bootstrap_writers();
        let idle: Vec<WriterKey> = st
            .writers
            .iter()
            .filter(|w| {
                let key = w.key();
                key != self.local_key
                    && w.flushed()
                    && !info.is_indexer(&key)
                    && !bootstraps.contains(&key)
            })
            .map(Writer::key)
            .collect();
        for key in idle {
            st.writers.evict(&key);
        }
    }
}
