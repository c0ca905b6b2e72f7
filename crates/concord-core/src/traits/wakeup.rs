use crate::keys::WriterKey;
use crate::models::NodeId;

/// Best-effort hints that wake sleeping peers when new heads exist.
pub trait WakeupChannel: Send + Sync {
    fn notify(&self, peer: &WriterKey, heads: &[NodeId]);
    fn broadcast(&self, heads: &[NodeId]);
}

/// Wake-up channel that drops every hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeup;

impl WakeupChannel for NoopWakeup {
    fn notify(&self, _peer: &WriterKey, _heads: &[NodeId]) {}
    fn broadcast(&self, _heads: &[NodeId]) {}
}
