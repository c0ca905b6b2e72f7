//! The reserved `_system` view.
//!
//! Block `i` holds the [`SystemEntry`] of the `i`-th linearized node: the
//! node id and the system snapshot after applying it. The last block is the
//! current state.

use concord_core::constants::{CURRENT_VERSION, SUPPORTED_VERSION};
use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::WriterKey;
use concord_core::models::{SystemEntry, SystemInfo};

use crate::view_store::ViewRef;

#[derive(Debug)]
pub struct SystemView {
    core: ViewRef,
    bootstrap: WriterKey,
    committed: SystemInfo,
    staged: Option<SystemInfo>,
}

impl SystemView {
    /// Loads the latest committed snapshot of `core`, or genesis when empty.
    pub fn open(core: ViewRef, bootstrap: WriterKey) -> BaseResult<Self> {
        let committed = read_latest(&core, bootstrap)?;
        Ok(Self {
            core,
            bootstrap,
            committed,
            staged: None,
        })
    }

    /// Current snapshot, staged changes included.
    pub fn info(&self) -> &SystemInfo {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    pub fn committed(&self) -> &SystemInfo {
        &self.committed
    }

    pub fn core(&self) -> &ViewRef {
        &self.core
    }

    /// Entries held, staged included.
    pub fn length(&self) -> u64 {
        self.core.length()
    }

    pub fn entry(&self, index: u64) -> BaseResult<Option<SystemEntry>> {
        self.core
            .get(index)?
            .map(|raw| decode_entry(&raw, index))
            .transpose()
    }

    /// Stages one entry; its snapshot becomes [`SystemView::info`].
    pub fn push(&mut self, entry: SystemEntry) -> BaseResult<()> {
        let raw = serde_json::to_vec(&entry)?;
        self.core.append([raw]);
        self.staged = Some(entry.info);
        Ok(())
    }

    /// Promotes the staged snapshot. The blocks are committed by the store.
    pub(crate) fn commit(&mut self) {
        if let Some(info) = self.staged.take() {
            self.committed = info;
        }
    }

    pub(crate) fn discard(&mut self) {
        self.staged = None;
    }

    /// Re-reads the snapshot after the core was swapped or checked out.
    pub(crate) fn reload(&mut self, core: ViewRef) -> BaseResult<()> {
        self.committed = read_latest(&core, self.bootstrap)?;
        self.core = core;
        self.staged = None;
        Ok(())
    }
}

fn read_latest(core: &ViewRef, bootstrap: WriterKey) -> BaseResult<SystemInfo> {
    let length = core.committed_length();
    if length == 0 {
        return Ok(SystemInfo::genesis(bootstrap, CURRENT_VERSION));
    }
    let raw = core.get(length - 1)?.ok_or_else(|| BaseError::Decode {
        details: format!("system entry {} is missing", length - 1),
    })?;
    Ok(decode_entry(&raw, length - 1)?.info)
}

pub(crate) fn decode_entry(raw: &[u8], index: u64) -> BaseResult<SystemEntry> {
    let entry: SystemEntry = serde_json::from_slice(raw).map_err(|e| BaseError::Decode {
        details: format!("system entry {index}: {e}"),
    })?;
    if entry.info.version > SUPPORTED_VERSION {
        return Err(BaseError::UpgradeRequired {
            version: entry.info.version,
            supported: SUPPORTED_VERSION,
        });
    }
    Ok(entry)
}
