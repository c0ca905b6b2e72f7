//! # concord-core
//!
//! Foundation crate for the Concord causal-merge engine.
//! Defines keys, node and record models, errors, config, constants,
//! and the storage collaborator traits. Every other crate in the
//! workspace depends on this.

pub mod config;
pub mod constants;
pub mod errors;
pub mod keys;
pub mod models;
pub mod traits;

// Re-export the most commonly used types at the crate root.
pub use config::{BaseConfig, OpenOptions};
pub use errors::{BaseError, BaseResult, StorageError, StorageResult};
pub use keys::{CoreKey, WriterKey};
pub use models::{BootRecord, Node, NodeId, SystemInfo, ViewInfo, WriterInfo};
pub use traits::{CoreKind, CoreOptions, CoreStore, LogCore, WakeupChannel};
