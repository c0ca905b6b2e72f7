use serde::{Deserialize, Serialize};

use crate::keys::{CoreKey, WriterKey};

use super::ViewInfo;

/// A verified remote system state a lagging instance may adopt wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// System core key at the checkpoint.
    pub key: CoreKey,
    /// Indexed length at the checkpoint.
    pub length: u64,
    pub indexers: Vec<WriterKey>,
    pub views: Vec<ViewInfo>,
}
