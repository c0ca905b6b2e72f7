//! Shared data models: DAG nodes, system snapshots, boot records, checkpoints.

mod boot;
mod checkpoint;
mod node;
mod system;

pub use boot::BootRecord;
pub use checkpoint::Checkpoint;
pub use node::{Node, NodeId, OplogMessage};
pub use system::{SystemEntry, SystemInfo, ViewInfo, WriterInfo};
