use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::StorageResult;
use crate::keys::CoreKey;

/// How replication treats a core.
///
/// Writer cores are authoritative logs of one actor and replicate into the
/// receiver's local blocks. View cores are derived state; a peer's blocks
/// land as verified remote blocks that are only adopted by `checkout` or
/// read through `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreKind {
    Writer,
    View,
}

/// Options for opening a core session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreOptions {
    pub kind: CoreKind,
    /// Base encryption key; blocks are encrypted at rest when set.
    pub encryption_key: Option<[u8; 32]>,
}

impl CoreOptions {
    pub fn writer(encryption_key: Option<[u8; 32]>) -> Self {
        Self {
            kind: CoreKind::Writer,
            encryption_key,
        }
    }

    pub fn view(encryption_key: Option<[u8; 32]>) -> Self {
        Self {
            kind: CoreKind::View,
            encryption_key,
        }
    }
}

/// One session on an append-only log core.
pub trait LogCore: Send + Sync + fmt::Debug {
    fn key(&self) -> CoreKey;
    fn kind(&self) -> CoreKind;

    /// Contiguous locally held length.
    fn length(&self) -> u64;
    /// Network-confirmed length: local blocks or verified remote blocks.
    fn signed_length(&self) -> u64;

    /// Reads a block, local or verified remote. `None` past `signed_length`.
    fn get(&self, index: u64) -> StorageResult<Option<Vec<u8>>>;
    /// Appends blocks locally, returning the new length.
    fn append(&self, values: &[Vec<u8>]) -> StorageResult<u64>;
    fn truncate(&self, length: u64) -> StorageResult<()>;

    /// Replaces the local blocks with the first `length` blocks of `source`.
    fn copy_prologue(&self, source: &dyn LogCore, length: u64) -> StorageResult<()>;
    /// Adopts verified remote blocks so the local length becomes `length`.
    fn checkout(&self, length: u64) -> StorageResult<()>;
    /// A fresh session on the same core.
    fn session(&self) -> Arc<dyn LogCore>;

    fn get_user_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn set_user_data(&self, key: &str, value: &[u8]) -> StorageResult<()>;
}

/// Factory and replication endpoint for log cores.
pub trait CoreStore: Send + Sync + fmt::Debug {
    /// Secret seed of this store; the local writer key derives from it.
    fn primary_key(&self) -> [u8; 32];

    /// Opens (creating when missing) a session on `key`.
    fn open_core(&self, key: &CoreKey, options: &CoreOptions) -> StorageResult<Arc<dyn LogCore>>;

    /// Signed length of `key` without opening it. 0 when unknown.
    fn stored_length(&self, key: &CoreKey) -> StorageResult<u64>;

    /// Every core held, with its kind.
    fn core_keys(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>>;

    /// Raw (possibly encrypted) local blocks of `key` from `start`.
    fn export_blocks(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>>;

    /// Receives raw blocks of a peer's core starting at `start`.
    fn import_blocks(
        &self,
        key: &CoreKey,
        kind: CoreKind,
        start: u64,
        blocks: Vec<Vec<u8>>,
    ) -> StorageResult<()>;
}
