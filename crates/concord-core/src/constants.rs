/// Concord crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Highest oplog and system record version this build can interpret.
pub const SUPPORTED_VERSION: u32 = 1;

/// Version stamped on newly written nodes and system records.
pub const CURRENT_VERSION: u32 = 1;

/// Reserved name of the system view.
pub const SYSTEM_VIEW_NAME: &str = "_system";

/// User-data key of the boot record on the local writer core.
pub const BOOT_RECORD_KEY: &str = "concord/boot";

/// User-data key of the persisted encryption key on the local writer core.
pub const ENCRYPTION_KEY_USER_DATA: &str = "concord/encryption";

/// Default background ack interval in milliseconds.
pub const DEFAULT_ACK_INTERVAL_MS: u64 = 10_000;

/// Default number of idle drains (per indexer) before an ack is forced.
pub const DEFAULT_ACK_THRESHOLD: u64 = 4;

/// Maximum number of remote batches merged per drain cycle.
pub const REMOTE_ADD_BATCH: usize = 64;

/// Minimum lead of a remote checkpoint before fast-forwarding to it.
pub const FAST_FORWARD_MINIMUM: u64 = 16;

/// Default fast-forward timeout in milliseconds.
pub const DEFAULT_FAST_FORWARD_TIMEOUT_MS: u64 = 60_000;

/// Number of evicted writer sessions kept for reuse.
pub const DEFAULT_CORE_POOL_SIZE: usize = 128;

/// Key-derivation contexts. Changing any of these changes every derived key.
pub mod contexts {
    pub const LOCAL_WRITER: &str = "concord 2024-06 local writer key";
    pub const VIEW_CORE: &str = "concord 2024-06 view core key";
    pub const BLOCK_CIPHER: &str = "concord 2024-06 block cipher key";
    pub const BLOCK_MAC: &str = "concord 2024-06 block mac key";
}
