//! Named view cores.
//!
//! Every view is a [`ViewCore`]: a swappable session on a log core plus
//! the blocks staged by the batch currently being applied. Keys are derived
//! from the bootstrap key, the view name and the materialized indexer set,
//! so an indexer change moves every view to a new core.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use concord_core::constants::SYSTEM_VIEW_NAME;
use concord_core::errors::{BaseError, BaseResult, StorageError};
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::ViewInfo;
use concord_core::traits::{CoreOptions, CoreStore, LogCore};

pub type ViewRef = Arc<ViewCore>;

#[derive(Debug)]
struct CoreState {
    core: Arc<dyn LogCore>,
    staged: Vec<Vec<u8>>,
}

/// One named view.
///
/// Staged blocks are visible through [`ViewCore::get`] and
/// [`ViewCore::length`] until the batch commits or is discarded.
#[derive(Debug)]
pub struct ViewCore {
    name: String,
    state: Mutex<CoreState>,
}

impl ViewCore {
    pub fn new(name: impl Into<String>, core: Arc<dyn LogCore>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(CoreState {
                core,
                staged: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> CoreKey {
        self.state().core.key()
    }

    /// Committed plus staged length.
    pub fn length(&self) -> u64 {
        let state = self.state();
        state.core.length() + state.staged.len() as u64
    }

    pub fn committed_length(&self) -> u64 {
        self.state().core.length()
    }

    pub fn get(&self, index: u64) -> BaseResult<Option<Vec<u8>>> {
        let state = self.state();
        let committed = state.core.length();
        if index < committed {
            return Ok(state.core.get(index)?);
        }
        Ok(state.staged.get((index - committed) as usize).cloned())
    }

    /// Stages blocks for the current batch. Returns the new length.
    pub fn append(&self, blocks: impl IntoIterator<Item = Vec<u8>>) -> u64 {
        let mut state = self.state();
        state.staged.extend(blocks);
        state.core.length() + state.staged.len() as u64
    }

    /// Digest of the committed blocks. Replicas that applied the same
    /// entries agree on it.
    pub fn hash(&self) -> BaseResult<[u8; 32]> {
        let core = self.core();
        let mut hasher = blake3::Hasher::new();
        for index in 0..core.length() {
            let block = core.get(index)?.ok_or_else(|| StorageError::BlockUnavailable {
                key: core.key().short(),
                index,
            })?;
            hasher.update(&(block.len() as u64).to_le_bytes());
            hasher.update(&block);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    pub fn has_staged(&self) -> bool {
        !self.state().staged.is_empty()
    }

    pub(crate) fn commit(&self) -> BaseResult<()> {
        let mut state = self.state();
        if state.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut state.staged);
        state.core.append(&staged)?;
        Ok(())
    }

    pub(crate) fn discard(&self) {
        self.state().staged.clear();
    }

    /// Drops staged blocks and truncates committed ones past `length`.
    pub(crate) fn rollback(&self, length: u64) -> BaseResult<()> {
        let mut state = self.state();
        state.staged.clear();
        if state.core.length() > length {
            state.core.truncate(length)?;
        }
        Ok(())
    }

    pub(crate) fn core(&self) -> Arc<dyn LogCore> {
        self.state().core.clone()
    }

    /// Points the view at `core`, returning the previous session.
    pub(crate) fn swap(&self, core: Arc<dyn LogCore>) -> Arc<dyn LogCore> {
        let mut state = self.state();
        state.staged.clear();
        std::mem::replace(&mut state.core, core)
    }
}

/// Opens and tracks the views of one base.
#[derive(Debug)]
pub struct ViewStore {
    store: Arc<dyn CoreStore>,
    bootstrap: WriterKey,
    encryption_key: Option<[u8; 32]>,
    indexers: Mutex<Vec<WriterKey>>,
    views: Mutex<BTreeMap<String, ViewRef>>,
}

impl ViewStore {
    /// `indexers` is the set the current cores were derived from.
    pub fn new(
        store: Arc<dyn CoreStore>,
        bootstrap: WriterKey,
        indexers: Vec<WriterKey>,
        encryption_key: Option<[u8; 32]>,
    ) -> Self {
        Self {
            store,
            bootstrap,
            encryption_key,
            indexers: Mutex::new(indexers),
            views: Mutex::new(BTreeMap::new()),
        }
    }

    fn views(&self) -> MutexGuard<'_, BTreeMap<String, ViewRef>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bootstrap(&self) -> WriterKey {
        self.bootstrap
    }

    pub fn indexers(&self) -> Vec<WriterKey> {
        self.indexers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_indexers(&self, indexers: Vec<WriterKey>) {
        *self.indexers.lock().unwrap_or_else(PoisonError::into_inner) = indexers;
    }

    pub fn core_store(&self) -> &Arc<dyn CoreStore> {
        &self.store
    }

    /// Key of view `name` under `indexers`.
    pub fn key_for(&self, name: &str, indexers: &[WriterKey]) -> CoreKey {
        CoreKey::for_view(&self.bootstrap, name, indexers)
    }

    pub(crate) fn open_core(&self, key: &CoreKey) -> BaseResult<Arc<dyn LogCore>> {
        Ok(self
            .store
            .open_core(key, &CoreOptions::view(self.encryption_key))?)
    }

    /// The application view `name`, opened on first use.
    pub fn get(&self, name: &str) -> BaseResult<ViewRef> {
        if name == SYSTEM_VIEW_NAME {
            return Err(BaseError::Handler {
                reason: format!("view name {name} is reserved"),
            });
        }
        self.get_or_open(name)
    }

    pub(crate) fn get_or_open(&self, name: &str) -> BaseResult<ViewRef> {
        if let Some(view) = self.views().get(name) {
            return Ok(view.clone());
        }
        let key = self.key_for(name, &self.indexers());
        let core = self.open_core(&key)?;
        let view = Arc::new(ViewCore::new(name, core));
        let mut views = self.views();
        Ok(views.entry(name.to_string()).or_insert(view).clone())
    }

    /// Registers an already opened system view core.
    pub(crate) fn insert_system(&self, view: ViewRef) {
        self.views().insert(SYSTEM_VIEW_NAME.to_string(), view);
    }

    /// Every view, the system view included, in name order.
    pub fn all(&self) -> Vec<ViewRef> {
        self.views().values().cloned().collect()
    }

    /// Name, key and current length of every application view.
    pub fn view_infos(&self) -> Vec<ViewInfo> {
        self.views()
            .values()
            .filter(|v| v.name() != SYSTEM_VIEW_NAME)
            .map(|v| ViewInfo {
                name: v.name().to_string(),
                key: v.key(),
                length: v.length(),
            })
            .collect()
    }

    /// Commits the application views, then the system view. If any commit
    /// fails, every view is truncated back to its length before the call.
    pub(crate) fn commit_all(&self) -> BaseResult<()> {
        let mut views = self.all();
        views.sort_by_key(|view| view.name() == SYSTEM_VIEW_NAME);
        let lengths: Vec<u64> = views.iter().map(|view| view.committed_length()).collect();
        for view in &views {
            if let Err(e) = view.commit() {
                for (view, length) in views.iter().zip(&lengths) {
                    if let Err(undo) = view.rollback(*length) {
                        tracing::error!(view = view.name(), error = %undo, "rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn discard_all(&self) {
        for view in self.all() {
            view.discard();
        }
    }
}
