//! Checkpoint discovery and adoption.
//!
//! A lagging instance may skip replaying history by adopting a remote
//! system state whole. A system core qualifies when its last entry belongs
//! to the same bootstrap, its key derives from the indexer set recorded in
//! that entry, and it holds exactly one entry per indexed node.

use concord_core::constants::SYSTEM_VIEW_NAME;
use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::Checkpoint;
use concord_core::traits::{CoreKind, CoreOptions, CoreStore, LogCore};

use crate::apply_state::ApplyState;
use crate::handlers::Handlers;
use crate::system::decode_entry;
use crate::view_store::ViewRef;

/// Searches `store` for the longest verified system core at least
/// `minimum` entries ahead of `local_length`. A `preferred` core only has
/// to be ahead.
pub fn find_checkpoint(
    store: &dyn CoreStore,
    bootstrap: &WriterKey,
    encryption_key: Option<[u8; 32]>,
    local_length: u64,
    minimum: u64,
    preferred: Option<CoreKey>,
) -> BaseResult<Option<Checkpoint>> {
    let mut best: Option<Checkpoint> = None;
    for (key, kind) in store.core_keys()? {
        if kind != CoreKind::View {
            continue;
        }
        let is_preferred = preferred == Some(key);
        let lead = if is_preferred { 1 } else { minimum.max(1) };
        if store.stored_length(&key)? < local_length + lead {
            continue;
        }
        let core = store.open_core(&key, &CoreOptions::view(encryption_key))?;
        let Some(candidate) = inspect(core.as_ref(), bootstrap) else {
            continue;
        };
        if candidate.length < local_length + lead {
            continue;
        }
        if is_preferred {
            return Ok(Some(candidate));
        }
        if best.as_ref().map_or(true, |b| candidate.length > b.length) {
            best = Some(candidate);
        }
    }
    Ok(best)
}

/// The checkpoint `core` holds, if it is a verified system core.
fn inspect(core: &dyn LogCore, bootstrap: &WriterKey) -> Option<Checkpoint> {
    let length = core.signed_length();
    if length == 0 {
        return None;
    }
    let raw = core.get(length - 1).ok().flatten()?;
    let entry = decode_entry(&raw, length - 1).ok()?;
    let info = entry.info;
    if info.bootstrap != *bootstrap || info.indexed_length != length {
        return None;
    }
    if CoreKey::for_view(bootstrap, SYSTEM_VIEW_NAME, &info.indexers) != core.key() {
        return None;
    }
    Some(Checkpoint {
        key: core.key(),
        length,
        indexers: info.indexers,
        views: info.views,
    })
}

impl<H: Handlers> ApplyState<H> {
    /// Adopts `checkpoint`: every view is checked out at its recorded
    /// length, on the cores of the checkpoint's indexer set. Nothing changes
    /// unless every target core holds enough verified blocks.
    pub fn adopt(&mut self, checkpoint: &Checkpoint) -> BaseResult<()> {
        let from = self.indexed_length();
        if checkpoint.length <= from {
            return Err(BaseError::FastForward {
                reason: format!("checkpoint at {} is not ahead of {from}", checkpoint.length),
            });
        }
        let views = self.view_store().clone();

        // (view, target key, target length, verified remotely)
        let mut targets: Vec<(ViewRef, CoreKey, u64, bool)> = vec![(
            self.system_view().core().clone(),
            checkpoint.key,
            checkpoint.length,
            true,
        )];
        for info in &checkpoint.views {
            targets.push((views.get_or_open(&info.name)?, info.key, info.length, true));
        }
        // Views the checkpoint does not list keep their local blocks.
        for view in views.all() {
            if targets.iter().any(|(t, ..)| t.name() == view.name()) {
                continue;
            }
            let key = views.key_for(view.name(), &checkpoint.indexers);
            let length = view.committed_length();
            targets.push((view, key, length, false));
        }

        let mut cores = Vec::with_capacity(targets.len());
        for (view, key, length, remote) in &targets {
            let core = if *key == view.key() {
                view.core()
            } else {
                views.open_core(key)?
            };
            if *remote && core.signed_length() < *length {
                return Err(BaseError::FastForward {
                    reason: format!(
                        "view {} holds {} of {length} blocks",
                        view.name(),
                        core.signed_length()
                    ),
                });
            }
            cores.push(core);
        }

        for ((view, key, length, _), core) in targets.iter().zip(cores) {
            if *key == view.key() {
                core.checkout(*length)?;
                continue;
            }
            let old = view.core();
            core.copy_prologue(old.as_ref(), old.length().min(*length))?;
            core.checkout(*length)?;
            view.swap(core);
        }

        views.set_indexers(checkpoint.indexers.clone());
        let system_core = self.system_view().core().clone();
        self.system_view_mut().reload(system_core)?;

        let info = self.system().clone();
        let boot = self.boot_mut();
        boot.system_key = checkpoint.key;
        boot.indexed_length = info.indexed_length;
        boot.heads = info.heads;
        boot.indexers_updated = false;
        boot.fast_forwarding = true;
        self.flush()?;

        tracing::info!(
            from,
            to = checkpoint.length,
            system = %checkpoint.key.short(),
            "fast-forwarded"
        );
        Ok(())
    }
}
