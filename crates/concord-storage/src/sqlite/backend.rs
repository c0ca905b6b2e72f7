use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use concord_core::errors::{StorageError, StorageResult};
use concord_core::keys::CoreKey;
use concord_core::traits::CoreKind;

use crate::backend::RawBackend;

use super::to_storage_err;

const PRIMARY_KEY_NAME: &str = "primary_key";

/// Blocks of one table (`blocks` or `remote_blocks`).
#[derive(Debug, Clone, Copy)]
enum Table {
    Local,
    Remote,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Local => "blocks",
            Table::Remote => "remote_blocks",
        }
    }
}

fn kind_str(kind: CoreKind) -> &'static str {
    match kind {
        CoreKind::Writer => "writer",
        CoreKind::View => "view",
    }
}

fn parse_kind(raw: &str) -> StorageResult<CoreKind> {
    match raw {
        "writer" => Ok(CoreKind::Writer),
        "view" => Ok(CoreKind::View),
        other => Err(StorageError::Corrupted {
            details: format!("unknown core kind {other:?}"),
        }),
    }
}

fn parse_key(raw: Vec<u8>) -> StorageResult<CoreKey> {
    let bytes: [u8; 32] = raw.try_into().map_err(|_| StorageError::Corrupted {
        details: "core key is not 32 bytes".to_string(),
    })?;
    Ok(CoreKey::from_bytes(bytes))
}

/// Single-connection backend. Every operation runs under one mutex, so
/// multi-statement updates are wrapped in transactions only for crash safety.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StorageError::Corrupted {
            details: format!("sqlite connection lock poisoned: {e}"),
        })
    }

    pub fn load_or_create_primary_key(&self) -> StorageResult<[u8; 32]> {
        let conn = self.lock()?;
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE name = ?1",
                params![PRIMARY_KEY_NAME],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_storage_err)?;
        if let Some(raw) = existing {
            return raw.try_into().map_err(|_| StorageError::Corrupted {
                details: "primary key is not 32 bytes".to_string(),
            });
        }
        let fresh: [u8; 32] = rand::random();
        conn.execute(
            "INSERT INTO store_meta (name, value) VALUES (?1, ?2)",
            params![PRIMARY_KEY_NAME, &fresh[..]],
        )
        .map_err(to_storage_err)?;
        Ok(fresh)
    }

    fn count(conn: &Connection, table: Table, key: &CoreKey) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE core = ?1", table.name());
        let count: i64 = conn
            .query_row(&sql, params![&key.as_bytes()[..]], |row| row.get(0))
            .map_err(to_storage_err)?;
        Ok(count as u64)
    }

    fn read(conn: &Connection, table: Table, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>> {
        let sql = format!("SELECT data FROM {} WHERE core = ?1 AND idx = ?2", table.name());
        conn.query_row(&sql, params![&key.as_bytes()[..], index as i64], |row| row.get(0))
            .optional()
            .map_err(to_storage_err)
    }

    fn write_all(
        conn: &Connection,
        table: Table,
        key: &CoreKey,
        start: u64,
        blocks: &[Vec<u8>],
    ) -> StorageResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (core, idx, data) VALUES (?1, ?2, ?3)",
            table.name()
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(to_storage_err)?;
        for (i, block) in blocks.iter().enumerate() {
            stmt.execute(params![&key.as_bytes()[..], (start + i as u64) as i64, block])
                .map_err(to_storage_err)?;
        }
        Ok(())
    }

    fn delete_from(conn: &Connection, table: Table, key: &CoreKey, from: u64) -> StorageResult<()> {
        let sql = format!("DELETE FROM {} WHERE core = ?1 AND idx >= ?2", table.name());
        conn.execute(&sql, params![&key.as_bytes()[..], from as i64])
            .map_err(to_storage_err)?;
        Ok(())
    }
}

impl RawBackend for SqliteBackend {
    fn ensure_core(&self, key: &CoreKey, kind: CoreKind) -> StorageResult<()> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO cores (key, kind) VALUES (?1, ?2)",
                params![&key.as_bytes()[..], kind_str(kind)],
            )
            .map_err(to_storage_err)?;
        Ok(())
    }

    fn list_cores(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, kind FROM cores ORDER BY key")
            .map_err(to_storage_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))
            .map_err(to_storage_err)?;
        let mut cores = Vec::new();
        for row in rows {
            let (key, kind) = row.map_err(to_storage_err)?;
            cores.push((parse_key(key)?, parse_kind(&kind)?));
        }
        Ok(cores)
    }

    fn local_length(&self, key: &CoreKey) -> StorageResult<u64> {
        let conn = self.lock()?;
        Self::count(&conn, Table::Local, key)
    }

    fn remote_length(&self, key: &CoreKey) -> StorageResult<u64> {
        let conn = self.lock()?;
        Self::count(&conn, Table::Remote, key)
    }

    fn read_local(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        Self::read(&conn, Table::Local, key, index)
    }

    fn read_remote(&self, key: &CoreKey, index: u64) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        Self::read(&conn, Table::Remote, key, index)
    }

    fn read_local_range(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM blocks WHERE core = ?1 AND idx >= ?2 ORDER BY idx")
            .map_err(to_storage_err)?;
        let rows = stmt
            .query_map(params![&key.as_bytes()[..], start as i64], |row| row.get(0))
            .map_err(to_storage_err)?;
        let blocks = rows
            .collect::<Result<Vec<Vec<u8>>, _>>()
            .map_err(to_storage_err)?;
        Ok(blocks)
    }

    fn append_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(to_storage_err)?;
        let start = Self::count(&tx, Table::Local, key)?;
        Self::write_all(&tx, Table::Local, key, start, &blocks)?;
        tx.commit().map_err(to_storage_err)?;
        Ok(start + blocks.len() as u64)
    }

    fn truncate_local(&self, key: &CoreKey, length: u64) -> StorageResult<()> {
        let conn = self.lock()?;
        let available = Self::count(&conn, Table::Local, key)?;
        if length > available {
            return Err(StorageError::InvalidTruncate {
                key: key.short(),
                length,
                available,
            });
        }
        Self::delete_from(&conn, Table::Local, key, length)
    }

    fn replace_local(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(to_storage_err)?;
        Self::delete_from(&tx, Table::Local, key, 0)?;
        Self::write_all(&tx, Table::Local, key, 0, &blocks)?;
        tx.commit().map_err(to_storage_err)
    }

    fn replace_remote(&self, key: &CoreKey, blocks: Vec<Vec<u8>>) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(to_storage_err)?;
        Self::delete_from(&tx, Table::Remote, key, 0)?;
        Self::write_all(&tx, Table::Remote, key, 0, &blocks)?;
        tx.commit().map_err(to_storage_err)
    }

    fn adopt_remote(&self, key: &CoreKey, length: u64) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(to_storage_err)?;
        let remote = Self::count(&tx, Table::Remote, key)?;
        if remote < length {
            return Err(StorageError::BlockUnavailable {
                key: key.short(),
                index: remote,
            });
        }
        Self::delete_from(&tx, Table::Local, key, 0)?;
        tx.execute(
            "INSERT INTO blocks (core, idx, data)
             SELECT core, idx, data FROM remote_blocks WHERE core = ?1 AND idx < ?2",
            params![&key.as_bytes()[..], length as i64],
        )
        .map_err(to_storage_err)?;
        tx.commit().map_err(to_storage_err)
    }

    fn get_user_data(&self, key: &CoreKey, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.lock()?
            .query_row(
                "SELECT value FROM user_data WHERE core = ?1 AND name = ?2",
                params![&key.as_bytes()[..], name],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_storage_err)
    }

    fn set_user_data(&self, key: &CoreKey, name: &str, value: &[u8]) -> StorageResult<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO user_data (core, name, value) VALUES (?1, ?2, ?3)",
                params![&key.as_bytes()[..], name, value],
            )
            .map_err(to_storage_err)?;
        Ok(())
    }
}
