//! SQLite-backed store: one file holds every core of one base instance.

mod backend;
mod migrations;
mod pragmas;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use concord_core::errors::{StorageError, StorageResult};
use concord_core::keys::CoreKey;
use concord_core::traits::{CoreKind, CoreOptions, CoreStore, LogCore};

use crate::backend::{import_into, RawBackend};
use crate::session::CoreSession;

use backend::SqliteBackend;

pub(crate) fn to_storage_err(message: impl std::fmt::Display) -> StorageError {
    StorageError::Sqlite {
        message: message.to_string(),
    }
}

/// Durable [`CoreStore`] on a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    primary_key: [u8; 32],
    backend: Arc<SqliteBackend>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path).map_err(to_storage_err)?;
        pragmas::apply_pragmas(&conn)?;
        Self::initialize(conn)
    }

    /// Opens a private in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_storage_err)?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> StorageResult<Self> {
        migrations::run_migrations(&conn)?;
        let backend = SqliteBackend::new(conn);
        let primary_key = backend.load_or_create_primary_key()?;
        Ok(Self {
            primary_key,
            backend: Arc::new(backend),
        })
    }
}

impl CoreStore for SqliteStore {
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
