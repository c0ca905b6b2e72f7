//! Applies linearized batches to the views and tracks the system state.

use std::sync::Arc;

use concord_core::constants::SYSTEM_VIEW_NAME;
use concord_core::errors::BaseResult;
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::{BootRecord, Node, NodeId, SystemEntry, SystemInfo, WriterInfo};
use concord_core::traits::{CoreOptions, CoreStore, LogCore};
use concord_dag::{LinearizedBatch, Linearizer};

use crate::handlers::{ApplyEntry, Handlers};
use crate::host::ApplyHost;
use crate::system::SystemView;
use crate::view_store::{ViewCore, ViewStore};

/// What one [`ApplyState::update`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Nodes of the batch applied. Fewer than the batch holds when an
    /// indexer change cut it short.
    pub applied: usize,
    /// Values handed to the application.
    pub values: usize,
    pub indexers_updated: bool,
    pub membership_changed: bool,
}

/// Views, system view and boot record of one base.
pub struct ApplyState<H: Handlers> {
    handlers: Arc<H>,
    views: Arc<ViewStore>,
    system: SystemView,
    view: H::View,
    local: Arc<dyn LogCore>,
    boot: BootRecord,
    boot_dirty: bool,
    bootstrap: WriterKey,
}

impl<H: Handlers> std::fmt::Debug for ApplyState<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyState")
            .field("bootstrap", &self.bootstrap)
            .field("system_key", &self.system_key())
            .field("indexed_length", &self.indexed_length())
            .finish_non_exhaustive()
    }
}

impl<H: Handlers> ApplyState<H> {
    /// Opens the system view named by the boot record on `local` (genesis
    /// when there is none) and every application view under the indexer
    /// set the current cores were derived from.
    pub fn open(
        handlers: Arc<H>,
        store: Arc<dyn CoreStore>,
        local: Arc<dyn LogCore>,
        bootstrap: WriterKey,
        encryption_key: Option<[u8; 32]>,
    ) -> BaseResult<Self> {
        let genesis_key = CoreKey::for_view(&bootstrap, SYSTEM_VIEW_NAME, &[bootstrap]);
        let (boot, boot_dirty) = match BootRecord::load(local.as_ref())? {
            Some(boot) => (boot, false),
            None => (BootRecord::genesis(genesis_key), true),
        };

        let core = store.open_core(&boot.system_key, &CoreOptions::view(encryption_key))?;
        let system_ref = Arc::new(ViewCore::new(SYSTEM_VIEW_NAME, core));
        let system = SystemView::open(system_ref.clone(), bootstrap)?;
        let materialized = materialized_indexers(&system, &bootstrap, &boot.system_key)?;

        let views = Arc::new(ViewStore::new(store, bootstrap, materialized, encryption_key));
        views.insert_system(system_ref);
        let view = handlers.open(&views)?;

        tracing::debug!(
            system = %boot.system_key.short(),
            indexed_length = system.committed().indexed_length,
            indexers_updated = boot.indexers_updated,
            "apply state opened"
        );
        Ok(Self {
            handlers,
            views,
            system,
            view,
            local,
            boot,
            boot_dirty,
            bootstrap,
        })
    }

    /// A linearizer resuming from the committed system state, tracking
    /// every writer the system knows.
    pub fn catchup(&self) -> Linearizer {
        let info = self.system.committed();
        let mut lin = Linearizer::new(
            self.bootstrap,
            info.indexers.clone(),
            info.heads.clone(),
            info.indexed_length,
        );
        for (key, writer) in &info.writers {
            lin.add_writer(*key, writer.length, writer.height);
        }
        lin
    }

    /// Applies `batch` group by group. Every write is staged and committed
    /// together at the end; any error discards all of them.
    ///
    /// Application stops after the first group that changes the indexer
    /// set: the rest of the batch must be linearized again under the new
    /// set.
    pub async fn update(&mut self, batch: &LinearizedBatch) -> BaseResult<ApplyOutcome> {
        let mut info = self.system.info().clone();
        let mut outcome = ApplyOutcome::default();
        if let Err(e) = self.apply_groups(batch, &mut info, &mut outcome).await {
            self.views.discard_all();
            self.system.discard();
            return Err(e);
        }
        if let Err(e) = self.views.commit_all() {
            self.views.discard_all();
            self.system.discard();
            return Err(e);
        }
        self.system.commit();

        self.boot.indexed_length = info.indexed_length;
        self.boot.heads = info.heads.clone();
        self.boot_dirty = true;
        if outcome.indexers_updated {
            self.boot.indexers_updated = true;
            self.flush()?;
        }
        tracing::debug!(
            applied = outcome.applied,
            values = outcome.values,
            indexed_length = info.indexed_length,
            indexers_updated = outcome.indexers_updated,
            "batch applied"
        );
        Ok(outcome)
    }

    async fn apply_groups(
        &mut self,
        batch: &LinearizedBatch,
        info: &mut SystemInfo,
        outcome: &mut ApplyOutcome,
    ) -> BaseResult<()> {
        for group in batch.groups() {
            // Values of writers outside the system are dropped.
            let entries: Vec<ApplyEntry> = if info.is_member(&group[0].writer) {
                group.iter().filter_map(ApplyEntry::from_node).collect()
            } else {
                Vec::new()
            };
            let (indexers_changed, membership_changed) = {
                let mut host = ApplyHost::new(info);
                if !entries.is_empty() {
                    self.handlers.apply(&entries, &self.view, &mut host).await?;
                }
                (host.indexers_changed(), host.membership_changed())
            };
            for node in group {
                record_node(info, node);
                info.views = self.views.view_infos();
                self.system.push(SystemEntry {
                    node: node.id(),
                    info: info.clone(),
                })?;
            }
            outcome.applied += group.len();
            outcome.values += entries.len();
            outcome.membership_changed |= membership_changed;
            if indexers_changed {
                outcome.indexers_updated = true;
                break;
            }
        }
        Ok(())
    }

    /// The committed indexer set differs from the set the cores were
    /// derived from.
    pub fn should_migrate(&self) -> bool {
        let indexers = &self.system.committed().indexers;
        self.views.key_for(SYSTEM_VIEW_NAME, indexers) != self.system_key()
    }

    /// Moves every view onto the cores of the committed indexer set. Each
    /// new core starts with the blocks of the old one. Returns the new
    /// system key.
    pub fn migrate(&mut self) -> BaseResult<CoreKey> {
        let indexers = self.system.committed().indexers.clone();
        for view in self.views.all() {
            let key = self.views.key_for(view.name(), &indexers);
            if key == view.key() {
                continue;
            }
            let old = view.core();
            let fresh = self.views.open_core(&key)?;
            fresh.copy_prologue(old.as_ref(), old.length())?;
            view.swap(fresh);
            tracing::debug!(
                view = view.name(),
                from = %old.key().short(),
                to = %key.short(),
                "view migrated"
            );
        }
        self.views.set_indexers(indexers);
        self.system.reload(self.system.core().clone())?;
        let key = self.system_key();
        self.finalize(key)?;
        Ok(key)
    }

    /// Points the boot record at `system_key` and clears the pending
    /// migration flag.
    fn finalize(&mut self, system_key: CoreKey) -> BaseResult<()> {
        let info = self.system.committed();
        self.boot.system_key = system_key;
        self.boot.indexed_length = info.indexed_length;
        self.boot.heads = info.heads.clone();
        self.boot.indexers_updated = false;
        self.flush()
    }

    pub fn should_flush(&self) -> bool {
        self.boot_dirty
    }

    /// Persists the boot record on the local core.
    pub fn flush(&mut self) -> BaseResult<()> {
        self.boot.store(self.local.as_ref())?;
        self.boot_dirty = false;
        Ok(())
    }

    /// Clears the fast-forward marker once catch-up drained past it.
    pub fn confirm_fast_forward(&mut self) -> BaseResult<bool> {
        if !self.boot.fast_forwarding {
            return Ok(false);
        }
        self.boot.fast_forwarding = false;
        self.flush()?;
        Ok(true)
    }

    pub async fn close(&mut self) -> BaseResult<()> {
        if self.boot_dirty {
            self.flush()?;
        }
        self.handlers.close(&self.view).await
    }

    pub fn indexed_length(&self) -> u64 {
        self.system.committed().indexed_length
    }

    /// Committed system snapshot.
    pub fn system(&self) -> &SystemInfo {
        self.system.committed()
    }

    pub fn system_view(&self) -> &SystemView {
        &self.system
    }

    pub(crate) fn system_view_mut(&mut self) -> &mut SystemView {
        &mut self.system
    }

    pub fn system_key(&self) -> CoreKey {
        self.system.core().key()
    }

    pub fn view(&self) -> &H::View {
        &self.view
    }

    pub fn view_store(&self) -> &Arc<ViewStore> {
        &self.views
    }

    pub fn boot(&self) -> &BootRecord {
        &self.boot
    }

    pub(crate) fn boot_mut(&mut self) -> &mut BootRecord {
        &mut self.boot
    }

    pub fn bootstrap(&self) -> WriterKey {
        self.bootstrap
    }
}

/// Advances the snapshot past one linearized node.
///
/// A writer seen for the first time here was never added, so it is
/// recorded as removed: its length is tracked but it stays a non-member.
fn record_node(info: &mut SystemInfo, node: &Node) {
    let writer = info.writers.entry(node.writer).or_insert_with(|| WriterInfo {
        is_removed: true,
        ..WriterInfo::default()
    });
    writer.length = writer.length.max(node.length());
    writer.height = writer.height.max(node.height);

    let prev = node.id().prev();
    info.heads
        .retain(|head| !node.heads.contains(head) && Some(*head) != prev);
    let id: NodeId = node.id();
    if let Err(pos) = info.heads.binary_search(&id) {
        info.heads.insert(pos, id);
    }
    info.indexed_length += 1;
}

/// Indexer set the system core at `system_key` was derived from.
///
/// Usually the committed set. After a crash between committing an indexer
/// change and migrating, it is the set of the last entry whose key matches.
fn materialized_indexers(
    system: &SystemView,
    bootstrap: &WriterKey,
    system_key: &CoreKey,
) -> BaseResult<Vec<WriterKey>> {
    let committed = &system.committed().indexers;
    if CoreKey::for_view(bootstrap, SYSTEM_VIEW_NAME, committed) == *system_key {
        return Ok(committed.clone());
    }
    let mut index = system.core().committed_length();
    while index > 0 {
        index -= 1;
        if let Some(entry) = system.entry(index)? {
            if CoreKey::for_view(bootstrap, SYSTEM_VIEW_NAME, &entry.info.indexers) == *system_key {
                return Ok(entry.info.indexers);
            }
        }
    }
    if CoreKey::for_view(bootstrap, SYSTEM_VIEW_NAME, &[*bootstrap]) == *system_key {
        return Ok(vec![*bootstrap]);
    }
    tracing::warn!(system = %system_key.short(), "no entry matches the system key");
    Ok(committed.clone())
}
