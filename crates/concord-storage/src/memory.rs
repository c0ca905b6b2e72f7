//! In-memory store.
//!
//! Cloning a [`MemoryStore`] shares its cores, so a base closed and
//! reopened on a clone sees everything the first instance persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use concord_core::errors::{StorageError, StorageResult};
use concord_core::keys::CoreKey;
use concord_core::traits::{CoreKind, CoreOptions, CoreStore, LogCore};

use crate::backend::{import_into, RawBackend};
use crate::session::CoreSession;

#[derive(Debug)]
struct CoreData {
    kind: CoreKind,
    local: Vec<Vec<u8>>,
    remote: Vec<Vec<u8>>,
    user_data: HashMap<String, Vec<u8>>,
}

impl CoreData {
    fn new(kind: CoreKind) -> Self {
        Self {
            kind,
            local: Vec::new(),
            remote: Vec::new(),
            user_data: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryBackend {
    cores: Mutex<HashMap<CoreKey, CoreData>>,
}

impl MemoryBackend {
    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<CoreKey, CoreData>>> {
        self.cores.lock().map_err(|e| StorageError::Corrupted {
            details: format!("memory store lock poisoned: {e}"),
        })
    }

    fn with_core<T>(
        &self,
        key: &CoreKey,
        f: impl FnOnce(&mut CoreData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut cores = self.lock()?;
        let core = cores.get_mut(key).ok_or_else(|| StorageError::CoreNotFound {
            key: key.short(),
        })?;
        f(core)
    }
}

impl RawBackend for MemoryBackend {
    fn ensure_core(&self, key: &CoreKey, kind: CoreKind) -> StorageResult<()> {
        self.lock()?.entry(*key).or_insert_with(|| CoreData::new(kind));
        Ok(())
    }

    fn list_cores(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>> {
        let mut cores: Vec<_> = self.lock()?.iter().map(|(k, c)| (*k, c.kind)).collect();
        cores.sort_by_key(|(k, _)| *k);
        Ok(cores)
    }

    fn local_length(&self, key: &CoreKey) -> StorageResult<u64> {
        Ok(self.lock()?.get(key).map_or(0, |c| c.local.len() as u64))
    }

    fn remote_length(&self, key: &CoreKey) -> StorageResult<u64> {
        Ok(self.lock()?.get(key).map_or(0, |c| c.remote.len() as u64))
    }

    fn read_local(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .lock()?
            .get(key)
            .and_then(|c| c.local.get(index as usize).cloned()))
    }

    fn read_remote(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .lock()?
            .get(key)
            .and_then(|c| c.remote.get(index as usize).cloned()))
    }

    fn read_local_range(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.lock()?.get(key).map_or_else(Vec::new, |c| {
            c.local.iter().skip(start as usize).cloned().collect()
        }))
    }

    fn append_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<u64> {
        self.with_core(key, |core| {
            core.local.extend(blocks);
            Ok(core.local.len() as u64)
        })
    }

    fn truncate_local(&self, key: &CoreKey, length: u64) -> StorageResult<()> {
        self.with_core(key, |core| {
            if length > core.local.len() as u64 {
                return Err(StorageError::InvalidTruncate {
                    key: key.short(),
                    length,
                    available: core.local.len() as u64,
                });
            }
            core.local.truncate(length as usize);
            Ok(())
        })
    }

    fn replace_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()> {
        self.with_core(key, |core| {
            core.local = blocks;
            Ok(())
        })
    }

    fn replace_remote(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()> {
        self.with_core(key, |core| {
            core.remote = blocks;
            Ok(())
        })
    }

    fn adopt_remote(&self, key: &CoreKey, length: u64) -> StorageResult<()> {
        self.with_core(key, |core| {
            if (core.remote.len() as u64) < length {
                return Err(StorageError::BlockUnavailable {
                    key: key.short(),
                    index: core.remote.len() as u64,
                });
            }
            core.local = core.remote[..length as usize].to_vec();
            Ok(())
        })
    }

    fn get_user_data(&self, key: &CoreKey, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .lock()?
            .get(key)
            .and_then(|c| c.user_data.get(name).cloned()))
    }

    fn set_user_data(&self, key: &CoreKey, name: &str, value: &[u8]) -> StorageResult<()> {
        self.with_core(key, |core| {
            core.user_data.insert(name.to_string(), value.to_vec());
            Ok(())
        })
    }
}

/// Process-local [`CoreStore`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    primary_key: [u8; 32],
    backend: Arc<MemoryBackend>,
}

impl MemoryStore {
    /// A store with a random primary key.
    pub fn new() -> Self {
        Self::with_primary_key(rand::random())
    }

    /// A store whose local writer key is fixed by `primary_key`.
    pub fn with_primary_key(primary_key: [u8; 32]) -> Self {
        Self {
            primary_key,
            backend: Arc::new(MemoryBackend::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreStore for MemoryStore {
    fn primary_key(&self) -> [u8; 32] {
        self.primary_key
    }

    fn open_core(&self, key: &CoreKey, options: &CoreOptions) -> StorageResult<Arc<dyn LogCore>> {
        let backend: Arc<dyn RawBackend> = self.backend.clone();
        Ok(Arc::new(CoreSession::open(backend, key, options)?))
    }

    fn stored_length(&self, key: &CoreKey) -> StorageResult<u64> {
        Ok(self
            .backend
            .local_length(key)?
            .max(self.backend.remote_length(key)?))
    }

    fn core_keys(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>> {
        self.backend.list_cores()
    }

    fn export_blocks(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>> {
        self.backend.read_local_range(key, start)
    }

    fn import_blocks(
        &self,
        key: &CoreKey,
        kind: CoreKind,
        start: u64,
        blocks: Vec<Vec<u8>>,
    ) -> StorageResult<()> {
        import_into(self.backend.as_ref(), key, kind, start, blocks)
    }
}
