use serde::{Deserialize, Serialize};

use crate::constants::{BOOT_RECORD_KEY, CURRENT_VERSION, SUPPORTED_VERSION};
use crate::errors::{BaseError, BaseResult};
use crate::keys::CoreKey;
use crate::traits::LogCore;

use super::NodeId;

/// Pointer persisted on the local writer core so a reopened base can
/// resume without replaying applied work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    pub version: u32,
    pub system_key: CoreKey,
    pub indexed_length: u64,
    /// The last applied batch changed the indexer set and migration may
    /// not have completed.
    pub indexers_updated: bool,
    /// A fast-forward was adopted and catch-up has not confirmed it yet.
    pub fast_forwarding: bool,
    pub heads: Vec<NodeId>,
}

impl BootRecord {
    /// Record of a base that has linearized nothing yet.
    pub fn genesis(system_key: CoreKey) -> Self {
        Self {
            version: CURRENT_VERSION,
            system_key,
            indexed_length: 0,
            indexers_updated: false,
            fast_forwarding: false,
            heads: Vec::new(),
        }
    }

    /// Reads the record from `core`'s user data. `None` on a fresh store.
    pub fn load(core: &dyn LogCore) -> BaseResult<Option<Self>> {
        let Some(raw) = core.get_user_data(BOOT_RECORD_KEY)? else {
            return Ok(None);
        };
        let record: Self = serde_json::from_slice(&raw).map_err(|e| BaseError::Decode {
            details: format!("boot record: {e}"),
        })?;
        if record.version > SUPPORTED_VERSION {
            return Err(BaseError::UpgradeRequired {
                version: record.version,
                supported: SUPPORTED_VERSION,
            });
        }
        Ok(Some(record))
    }

    pub fn store(&self, core: &dyn LogCore) -> BaseResult<()> {
        let raw = serde_json::to_vec(self)?;
        core.set_user_data(BOOT_RECORD_KEY, &raw)?;
        Ok(())
    }
}
