//! # concord-dag
//!
//! The causal DAG built from writer logs and the quorum linearizer that
//! turns it into one agreed order.
//!
//! ## Modules
//!
//! - [`writer`]: cursor over one writer's log
//! - [`active_writers`]: writers tracked by one base instance
//! - [`core_pool`]: lingering sessions of evicted writers
//! - [`linearizer`]: frontier, quorum ranking, ack heuristic

pub mod active_writers;
pub mod core_pool;
pub mod linearizer;
pub mod writer;

pub use active_writers::ActiveWriterSet;
pub use core_pool::CorePool;
pub use linearizer::{LinearizedBatch, Linearizer};
pub use writer::Writer;
