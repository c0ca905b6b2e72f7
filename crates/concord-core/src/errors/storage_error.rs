/// Errors raised by the storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("core not found: {key}")]
    CoreNotFound { key: String },

    #[error("block {index} of core {key} is not available")]
    BlockUnavailable { key: String, index: u64 },

    #[error("cannot truncate core {key} to {length}: only {available} blocks")]
    InvalidTruncate {
        key: String,
        length: u64,
        available: u64,
    },

    #[error("block {index} of core {key} failed to decrypt")]
    Decrypt { key: String, index: u64 },

    #[error("SQLite error: {message}")]
    Sqlite { message: String },

    #[error("storage corruption detected: {details}")]
    Corrupted { details: String },
}

/// Convenience alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
