use serde::{Deserialize, Serialize};

use crate::constants::SUPPORTED_VERSION;
use crate::errors::{BaseError, BaseResult, StorageError};
use crate::keys::WriterKey;
use crate::traits::LogCore;

/// Identity of a node: a writer and a position in its log.
///
/// Ordering is by writer key, then seq. That is the global tie-break
/// between concurrent nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub writer: WriterKey,
    pub seq: u64,
}

impl NodeId {
    pub fn new(writer: WriterKey, seq: u64) -> Self {
        Self { writer, seq }
    }

    /// Writer log length at which this node exists.
    pub fn length(&self) -> u64 {
        self.seq + 1
    }

    /// The previous node of the same writer, if any.
    pub fn prev(&self) -> Option<NodeId> {
        self.seq.checked_sub(1).map(|seq| NodeId::new(self.writer, seq))
    }
}

/// Immutable DAG vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub writer: WriterKey,
    pub seq: u64,
    /// Remaining nodes in this co-appended group, counting this one.
    /// The last node of a group has `batch == 1`.
    pub batch: u32,
    /// Causal parents: the frontier seen by the writer at append time.
    pub heads: Vec<NodeId>,
    /// `None` marks a pure acknowledgement.
    pub value: Option<Vec<u8>>,
    /// Causal height stamped by the author: greater than the height of
    /// every node this one depends on.
    pub height: u64,
    pub version: u32,
}

impl Node {
    pub fn id(&self) -> NodeId {
        NodeId::new(self.writer, self.seq)
    }

    pub fn length(&self) -> u64 {
        self.seq + 1
    }

    pub fn is_ack(&self) -> bool {
        self.value.is_none()
    }

    /// Whether this node closes its co-appended group.
    pub fn ends_group(&self) -> bool {
        self.batch <= 1
    }

    /// Decodes the block stored at `seq` of `writer`'s log.
    pub fn decode(writer: WriterKey, seq: u64, block: &[u8]) -> BaseResult<Self> {
        let message: OplogMessage = serde_json::from_slice(block).map_err(|e| BaseError::Decode {
            details: format!("node {}:{seq}: {e}", writer.short()),
        })?;
        if message.version > SUPPORTED_VERSION {
            return Err(BaseError::UpgradeRequired {
                version: message.version,
                supported: SUPPORTED_VERSION,
            });
        }
        Ok(Self {
            writer,
            seq,
            batch: message.batch.max(1),
            heads: message.heads,
            value: message.value,
            height: message.height,
            version: message.version,
        })
    }

    pub fn encode(&self) -> BaseResult<Vec<u8>> {
        let message = OplogMessage {
            version: self.version,
            heads: self.heads.clone(),
            batch: self.batch,
            value: self.value.clone(),
            height: self.height,
        };
        Ok(serde_json::to_vec(&message)?)
    }
}

/// On-disk form of one writer-log block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogMessage {
    pub version: u32,
    pub heads: Vec<NodeId>,
    pub batch: u32,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
    pub height: u64,
}

impl OplogMessage {
    /// Whether `core` is a writer log: its first block is an oplog message.
    /// Fails on an empty core.
    pub fn is_oplog_core(core: &dyn LogCore) -> BaseResult<bool> {
        let block = core.get(0)?.ok_or_else(|| StorageError::BlockUnavailable {
            key: core.key().short(),
            index: 0,
        })?;
        Ok(serde_json::from_slice::<OplogMessage>(&block).is_ok())
    }
}
