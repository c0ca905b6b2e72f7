//! Raw block tables shared by every store implementation.

use std::fmt;

use concord_core::errors::StorageResult;
use concord_core::keys::CoreKey;
use concord_core::traits::CoreKind;

/// Unencrypted view of a store: per core, a local block list, a list of
/// verified remote blocks, and a user-data map.
pub trait RawBackend: Send + Sync + fmt::Debug + 'static {
    fn ensure_core(&self, key: &CoreKey, kind: CoreKind) -> StorageResult<()>;
    fn list_cores(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>>;

    fn local_length(&self, key: &CoreKey) -> StorageResult<u64>;
    fn remote_length(&self, key: &CoreKey) -> StorageResult<u64>;

    fn read_local(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>>;
    fn read_remote(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>>;
    fn read_local_range(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>>;

    fn append_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<u64>;
    fn truncate_local(&self, key: &CoreKey, length: u64) -> StorageResult<()>;
    /// Atomically replaces all local blocks.
    fn replace_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()>;
    /// Atomically replaces the remote blocks.
    fn replace_remote(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()>;
    /// Makes the first `length` remote blocks the local blocks.
    fn adopt_remote(&self, key: &CoreKey, length: u64) -> StorageResult<()>;

    fn get_user_data(&self, key: &CoreKey, name: &str) -> StorageResult<Option<Vec<u8>>>;
    fn set_user_data(&self, key: &CoreKey, name: &str, value: &[u8]) -> StorageResult<()>;
}

/// Shared receive path of `CoreStore::import_blocks`.
pub(crate) fn import_into(
    backend: &dyn RawBackend,
    key: &CoreKey,
    kind: CoreKind,
    start: u64,
    blocks: Vec<Vec<u8>>,
) -> StorageResult<()> {
    backend.ensure_core(key, kind)?;
    match kind {
        CoreKind::Writer => {
            let local = backend.local_length(key)?;
            let end = start + blocks.len() as u64;
            if start > local || end <= local {
                return Ok(());
            }
            let skip = (local - start) as usize;
            let tail: Vec<Vec<u8>> = blocks.into_iter().skip(skip).collect();
            backend.append_local(key, tail)?;
        }
        CoreKind::View => {
            if start != 0 {
                return Ok(());
            }
            if blocks.len() as u64 > backend.remote_length(key)? {
                backend.replace_remote(key, blocks)?;
            }
        }
    }
    Ok(())
}
