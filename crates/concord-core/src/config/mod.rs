//! Configuration for a Concord base.
//!
//! Every section has defaults, so an empty TOML document is a valid config.
//!
//! # Examples
//!
//! ```
//! use concord_core::config::BaseConfig;
//!
//! let config = BaseConfig::from_toml("[ack]\nthreshold = 0\n").unwrap();
//! assert_eq!(config.ack.threshold, 0);
//! assert_eq!(config.ack.interval_ms, 10_000);
//! ```

mod ack_config;
mod fast_forward_config;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CORE_POOL_SIZE, REMOTE_ADD_BATCH};
use crate::errors::{BaseError, BaseResult};
use crate::keys::WriterKey;

pub use ack_config::AckConfig;
pub use fast_forward_config::FastForwardConfig;

/// Root configuration of a base instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub ack: AckConfig,
    pub fast_forward: FastForwardConfig,
    pub drain: DrainConfig,
    pub pool: PoolConfig,
    pub encryption: EncryptionConfig,
    pub tracing: TracingConfig,
}

impl BaseConfig {
    /// Parses a TOML document, filling missing fields with defaults.
    pub fn from_toml(source: &str) -> BaseResult<Self> {
        toml::from_str(source).map_err(|e| BaseError::Config {
            reason: e.to_string(),
        })
    }

    /// Serializes the config back to TOML.
    pub fn to_toml(&self) -> BaseResult<String> {
        toml::to_string(self).map_err(|e| BaseError::Config {
            reason: e.to_string(),
        })
    }
}

/// Drain loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Remote batches merged per drain cycle before yielding. Default: 64.
    pub remote_add_batch: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            remote_add_batch: REMOTE_ADD_BATCH,
        }
    }
}

/// Writer session pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Evicted writer sessions lingering for reuse. Default: 128.
    pub core_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: DEFAULT_CORE_POOL_SIZE,
        }
    }
}

/// Block encryption policy. The key itself is passed through [`OpenOptions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Fail to open when no key can be resolved. Default: false.
    pub encrypted: bool,
    /// Generate and persist a fresh key when none is stored. Default: false.
    pub encrypt: bool,
}

/// Log output settings consumed by `concord_base::init_tracing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Default filter directive when `CONCORD_LOG` is unset. Default: "info".
    pub level: String,
    /// Emit JSON lines instead of human-readable output. Default: false.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything `Base::open` needs besides the store and handlers.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Bootstrap writer. `None` makes the local writer the bootstrap.
    pub bootstrap: Option<WriterKey>,
    /// Block encryption key shared by all writers of the base.
    pub encryption_key: Option<[u8; 32]>,
    pub config: BaseConfig,
}

impl OpenOptions {
    pub fn new(config: BaseConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn bootstrap(mut self, key: WriterKey) -> Self {
        self.bootstrap = Some(key);
        self
    }

    pub fn encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }
}
