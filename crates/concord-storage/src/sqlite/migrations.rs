//! Schema migrations, tracked with `PRAGMA user_version`.

use rusqlite::Connection;

use concord_core::errors::{StorageError, StorageResult};

use super::to_storage_err;

const LATEST_VERSION: u32 = 1;

pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    let current: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(to_storage_err)?;
    if current > LATEST_VERSION {
        return Err(StorageError::Corrupted {
            details: format!("schema version {current} is newer than {LATEST_VERSION}"),
        });
    }
    if current < 1 {
        v001_core_tables(conn)?;
    }
    conn.pragma_update(None, "user_version", LATEST_VERSION)
        .map_err(to_storage_err)?;
    Ok(())
}

fn v001_core_tables(conn: &Connection) -> StorageResult<()> {
    tracing::info!("v001: creating core tables");
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS store_meta (
            name  TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cores (
            key  BLOB PRIMARY KEY,
            kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blocks (
            core BLOB NOT NULL,
            idx  INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (core, idx),
            FOREIGN KEY (core) REFERENCES cores(key)
        );

        CREATE TABLE IF NOT EXISTS remote_blocks (
            core BLOB NOT NULL,
            idx  INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (core, idx),
            FOREIGN KEY (core) REFERENCES cores(key)
        );

        CREATE TABLE IF NOT EXISTS user_data (
            core  BLOB NOT NULL,
            name  TEXT NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (core, name),
            FOREIGN KEY (core) REFERENCES cores(key)
        );
        ",
    )
    .map_err(to_storage_err)?;
    Ok(())
}
