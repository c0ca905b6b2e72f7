use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ACK_INTERVAL_MS, DEFAULT_ACK_THRESHOLD};

/// Background acknowledgement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    /// Base delay of the ack timer in milliseconds; 0 disables the timer. Default: 10_000.
    pub interval_ms: u64,
    /// Idle drains per indexer before an ack is forced; 0 disables forcing. Default: 4.
    pub threshold: u64,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_ACK_INTERVAL_MS,
            threshold: DEFAULT_ACK_THRESHOLD,
        }
    }
}

impl AckConfig {
    /// Settings for tests and tools that ack explicitly.
    pub fn manual() -> Self {
        Self {
            interval_ms: 0,
            threshold: 0,
        }
    }

    pub fn timer_enabled(&self) -> bool {
        self.interval_ms > 0
    }
}
