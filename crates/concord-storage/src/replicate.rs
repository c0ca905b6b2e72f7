//! One full replication round between two stores.

use concord_core::errors::StorageResult;
use concord_core::traits::{CoreKind, CoreStore};

/// Blocks moved by one [`replicate`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationStats {
    pub cores: usize,
    pub blocks: usize,
}

/// Syncs every core of `a` into `b` and every core of `b` into `a`.
///
/// Writer cores are append-only logs of one actor, so only the missing
/// tail is sent. View cores are offered whole and land in the receiver's
/// verified remote blocks when they are longer than what it holds.
pub fn replicate(a: &dyn CoreStore, b: &dyn CoreStore) -> StorageResult<ReplicationStats> {
    let mut stats = push(a, b)?;
    let back = push(b, a)?;
    stats.cores += back.cores;
    stats.blocks += back.blocks;
    Ok(stats)
}

fn push(from: &dyn CoreStore, to: &dyn CoreStore) -> StorageResult<ReplicationStats> {
    let mut stats = ReplicationStats::default();
    for (key, kind) in from.core_keys()? {
        let start = match kind {
            CoreKind::Writer => to.stored_length(&key)?,
            CoreKind::View => 0,
        };
        let blocks = from.export_blocks(&key, start)?;
        if kind == CoreKind::View && (blocks.len() as u64) <= to.stored_length(&key)? {
            continue;
        }
        stats.cores += 1;
        stats.blocks += blocks.len();
        to.import_blocks(&key, kind, start, blocks)?;
    }
    tracing::trace!(cores = stats.cores, blocks = stats.blocks, "replicated");
    Ok(stats)
}
