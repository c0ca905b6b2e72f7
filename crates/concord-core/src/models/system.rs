use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::keys::{CoreKey, WriterKey};

use super::NodeId;

/// Membership record of one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterInfo {
    /// Number of this writer's nodes already linearized.
    pub length: u64,
    /// Height of the writer's last linearized node.
    pub height: u64,
    pub is_indexer: bool,
    pub is_removed: bool,
}

/// Name, core and applied length of one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub key: CoreKey,
    pub length: u64,
}

/// Snapshot of the system state at some indexed length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: u32,
    pub bootstrap: WriterKey,
    pub indexed_length: u64,
    pub writers: BTreeMap<WriterKey, WriterInfo>,
    /// Current indexer set, sorted by key.
    pub indexers: Vec<WriterKey>,
    /// Frontier of the linearized DAG, sorted.
    pub heads: Vec<NodeId>,
    pub views: Vec<ViewInfo>,
}

impl SystemInfo {
    /// The state before anything has been linearized.
    pub fn genesis(bootstrap: WriterKey, version: u32) -> Self {
        let mut writers = BTreeMap::new();
        writers.insert(
            bootstrap,
            WriterInfo {
                length: 0,
                height: 0,
                is_indexer: true,
                is_removed: false,
            },
        );
        Self {
            version,
            bootstrap,
            indexed_length: 0,
            writers,
            indexers: vec![bootstrap],
            heads: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn writer(&self, key: &WriterKey) -> Option<&WriterInfo> {
        self.writers.get(key)
    }

    /// Present and not removed.
    pub fn is_member(&self, key: &WriterKey) -> bool {
        self.writers.get(key).is_some_and(|w| !w.is_removed)
    }

    pub fn is_indexer(&self, key: &WriterKey) -> bool {
        self.indexers.binary_search(key).is_ok()
    }

    /// Whether `key` may be removed: anything but the sole indexer.
    pub fn is_removable(&self, key: &WriterKey) -> bool {
        self.indexers.len() != 1 || self.indexers[0] != *key
    }

    /// Height of `key`'s last linearized node, 0 when unknown.
    pub fn writer_height(&self, key: &WriterKey) -> u64 {
        self.writers.get(key).map_or(0, |w| w.height)
    }

    /// Linearized length of `key`'s log, 0 when unknown.
    pub fn writer_length(&self, key: &WriterKey) -> u64 {
        self.writers.get(key).map_or(0, |w| w.length)
    }

    pub fn view(&self, name: &str) -> Option<&ViewInfo> {
        self.views.iter().find(|v| v.name == name)
    }
}

/// One block of the system view: the node linearized at this position
/// and the system snapshot after applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEntry {
    pub node: NodeId,
    pub info: SystemInfo,
}
