//! # concord-storage
//!
//! Implementations of the log-core collaborator used by a Concord base.
//!
//! - [`MemoryStore`]: process-local store for tests and simulation.
//! - [`SqliteStore`]: durable store on a single SQLite file.
//! - [`replicate`]: one full sync round between two stores.
//!
//! Both stores hand out [`CoreSession`]s, which apply block encryption
//! on top of the store's raw block tables.

pub mod backend;
pub mod cipher;
pub mod memory;
pub mod replicate;
pub mod session;
pub mod sqlite;

pub use cipher::BlockCipher;
pub use memory::MemoryStore;
pub use replicate::{replicate, ReplicationStats};
pub use session::CoreSession;
pub use sqlite::SqliteStore;
