use std::collections::BTreeMap;

use concord_core::keys::WriterKey;
use concord_core::models::NodeId;

/// Per-writer observed lengths of a node's unconfirmed ancestry,
/// the node itself included.
///
/// Confirmed ancestors are never recorded. The confirmed set is closed
/// under ancestry, so for an unconfirmed node `x`, `observes(x)` is exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clock(BTreeMap<WriterKey, u64>);

impl Clock {
    pub fn get(&self, writer: &WriterKey) -> u64 {
        self.0.get(writer).copied().unwrap_or(0)
    }

    pub fn observes(&self, id: &NodeId) -> bool {
        self.get(&id.writer) > id.seq
    }

    pub fn merge(&mut self, other: &Clock) {
        for (writer, length) in &other.0 {
            let entry = self.0.entry(*writer).or_insert(0);
            *entry = (*entry).max(*length);
        }
    }

    pub fn include(&mut self, id: &NodeId) {
        let entry = self.0.entry(id.writer).or_insert(0);
        *entry = (*entry).max(id.seq + 1);
    }
}
