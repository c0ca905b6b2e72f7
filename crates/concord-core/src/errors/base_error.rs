use super::StorageError;

/// Top-level error taxonomy for a Concord base.
#[derive(Debug, thiserror::Error)]
pub enum BaseError {
    /// Voluntary abort raised from the apply callback. Not a failure.
    #[error("apply interrupted: {}", reason.as_deref().unwrap_or("no reason given"))]
    Interrupted { reason: Option<String> },

    #[error("not writable: {reason}")]
    NotWritable { reason: String },

    #[error("base is closing")]
    Closing,

    #[error("upgrade required: record version {version} exceeds supported version {supported}")]
    UpgradeRequired { version: u32, supported: u32 },

    #[error("encryption key is expected but none was resolved")]
    EncryptionKeyMissing,

    #[error("not allowed to remove the last indexer {key}")]
    LastIndexer { key: String },

    #[error("handler failed: {reason}")]
    Handler { reason: String },

    #[error("malformed record: {details}")]
    Decode { details: String },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("fast-forward aborted: {reason}")]
    FastForward { reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BaseError {
    /// Builds the interrupt signal carrying an optional reason.
    pub fn interrupted(reason: impl Into<Option<String>>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
        }
    }

    /// Wraps an arbitrary handler failure.
    pub fn handler(reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            reason: reason.to_string(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Errors after which the instance must not keep advancing.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Interrupted { .. } | Self::NotWritable { .. } | Self::Closing | Self::FastForward { .. }
        )
    }
}

/// Convenience alias for base results.
pub type BaseResult<T> = Result<T, BaseError>;
