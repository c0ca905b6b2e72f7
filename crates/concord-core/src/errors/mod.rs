mod base_error;
mod storage_error;

pub use base_error::{BaseError, BaseResult};
pub use storage_error::{StorageError, StorageResult};
