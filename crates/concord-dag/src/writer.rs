//! Cursor over one writer's append-only log.
//!
//! A writer tracks three positions in its log:
//!
//! - `length`: nodes already linearized and applied,
//! - `advance_pointer`: nodes merged into the linearizer frontier,
//! - the core length: nodes available in storage.
//!
//! Nodes between the advance pointer and the core length are decoded on
//! [`Writer::update`] and handed out by [`Writer::advance`] one at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use concord_core::constants::CURRENT_VERSION;
use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::WriterKey;
use concord_core::models::{Node, NodeId};
use concord_core::traits::LogCore;

/// Lifecycle flags of a writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterFlags {
    pub is_indexer: bool,
    pub is_bootstrap: bool,
    pub is_removed: bool,
    pub is_local: bool,
}

#[derive(Debug)]
pub struct Writer {
    key: WriterKey,
    core: Arc<dyn LogCore>,
    pub flags: WriterFlags,
    length: u64,
    advance_pointer: u64,
    pending: VecDeque<Node>,
    depth: Option<u32>,
}

impl Writer {
    /// A writer whose first `length` nodes are already linearized.
    pub fn new(key: WriterKey, core: Arc<dyn LogCore>, length: u64, flags: WriterFlags) -> Self {
        Self {
            key,
            core,
            flags,
            length,
            advance_pointer: length,
            pending: VecDeque::new(),
            depth: None,
        }
    }

    pub fn key(&self) -> WriterKey {
        self.key
    }

    pub fn core(&self) -> &Arc<dyn LogCore> {
        &self.core
    }

    /// Linearized node count.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn advance_pointer(&self) -> u64 {
        self.advance_pointer
    }

    /// Nodes available in storage.
    pub fn available(&self) -> u64 {
        self.core.length()
    }

    /// Decodes newly stored nodes. Returns how many were read.
    pub fn update(&mut self) -> BaseResult<usize> {
        let start = self.advance_pointer + self.pending.len() as u64;
        let end = self.core.length();
        for seq in start..end {
            let block = self.core.get(seq)?.ok_or_else(|| BaseError::Decode {
                details: format!("writer {} block {seq} vanished", self.key.short()),
            })?;
            self.pending.push_back(Node::decode(self.key, seq, &block)?);
        }
        Ok(end.saturating_sub(start) as usize)
    }

    /// Size of the co-appended group at the front, when all of it is decoded.
    pub fn ready_group(&self) -> Option<usize> {
        self.pending
            .iter()
            .position(Node::ends_group)
            .map(|end| end + 1)
    }

    /// Heads of the front group that are not satisfied by `known` nor by
    /// earlier nodes of the same group.
    pub fn missing_dependencies(&self, known: impl Fn(&NodeId) -> bool) -> Vec<NodeId> {
        let Some(size) = self.ready_group() else {
            return Vec::new();
        };
        let first = self.advance_pointer;
        let mut missing: Vec<NodeId> = self
            .pending
            .iter()
            .take(size)
            .flat_map(|node| node.heads.iter())
            .filter(|head| !(head.writer == self.key && head.seq >= first) && !known(head))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Hands out the next not-yet-merged node.
    pub fn advance(&mut self) -> Option<Node> {
        let node = self.pending.pop_front()?;
        self.advance_pointer += 1;
        Some(node)
    }

    /// Appends a group of local nodes. All but the first depend only on
    /// their predecessor. The first node gets `height`, each later one sits
    /// one above its predecessor.
    pub fn append(
        &mut self,
        values: Vec<Option<Vec<u8>>>,
        heads: Vec<NodeId>,
        height: u64,
    ) -> BaseResult<Vec<Node>> {
        if !self.flags.is_local {
            return Err(BaseError::NotWritable {
                reason: format!("writer {} is not local", self.key.short()),
            });
        }
        if !self.idle() {
            return Err(BaseError::NotWritable {
                reason: "local writer has unmerged nodes".to_string(),
            });
        }
        let total = values.len();
        let mut nodes = Vec::with_capacity(total);
        for (i, value) in values.into_iter().enumerate() {
            let seq = self.advance_pointer + i as u64;
            let node_heads = if i == 0 {
                heads.clone()
            } else {
                vec![NodeId::new(self.key, seq - 1)]
            };
            nodes.push(Node {
                writer: self.key,
                seq,
                batch: (total - i) as u32,
                heads: node_heads,
                value,
                height: height + i as u64,
                version: CURRENT_VERSION,
            });
        }
        let blocks = nodes.iter().map(Node::encode).collect::<BaseResult<Vec<_>>>()?;
        self.core.append(&blocks)?;
        self.advance_pointer += total as u64;
        Ok(nodes)
    }

    /// Rebases all cursors on a new linearized length.
    pub fn reset(&mut self, length: u64) {
        self.length = length;
        self.advance_pointer = length;
        self.pending.clear();
    }

    /// Marks the node at `seq` as linearized.
    pub fn shift(&mut self, seq: u64) {
        self.length = self.length.max(seq + 1);
    }

    /// Records that this writer was referenced `depth` hops from a member.
    pub fn seen(&mut self, depth: u32) {
        self.depth = Some(self.depth.map_or(depth, |d| d.min(depth)));
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    /// Everything stored has been merged.
    pub fn idle(&self) -> bool {
        self.pending.is_empty() && self.advance_pointer == self.core.length()
    }

    /// Everything stored has been merged and linearized.
    pub fn flushed(&self) -> bool {
        self.idle() && self.length == self.advance_pointer
    }
}
