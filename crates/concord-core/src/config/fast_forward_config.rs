use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FAST_FORWARD_TIMEOUT_MS, FAST_FORWARD_MINIMUM};

/// Fast-forward settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastForwardConfig {
    /// Whether remote checkpoints may be adopted. Default: true.
    pub enabled: bool,
    /// Hex system key to fast-forward to at open. Default: none.
    pub key: Option<String>,
    /// Minimum lead (entries) of the remote checkpoint over local state. Default: 16.
    pub minimum: u64,
    /// Upper bound on waiting for the checkpoint in milliseconds. Default: 60_000.
    pub timeout_ms: u64,
}

impl Default for FastForwardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key: None,
            minimum: FAST_FORWARD_MINIMUM,
            timeout_ms: DEFAULT_FAST_FORWARD_TIMEOUT_MS,
        }
    }
}
