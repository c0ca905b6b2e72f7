//! # concord-base
//!
//! The orchestrator of a Concord base. A [`Base`] owns the local writer,
//! merges the logs of every writer it knows into one causal DAG, feeds the
//! quorum-confirmed order to the application's [`Handlers`] and keeps the
//! views consistent across indexer changes and fast-forwards.
//!
//! ## Modules
//!
//! - [`base`]: open/close lifecycle, appends, acks, introspection
//! - `drain`: the single-flight merge-linearize-apply loop
//! - [`scheduler`]: single-flight async job runner
//! - [`ack_timer`]: jittered background acknowledgements
//! - [`wakeup`]: hints about writers with unread data
//! - [`fast_forward`]: bounded checkpoint search at open
//! - [`events`]: lifecycle events
//! - [`tracing_setup`]: subscriber init and span macros
//!
//! [`Handlers`]: concord_apply::Handlers

pub mod ack_timer;
pub mod base;
mod drain;
pub mod events;
pub mod fast_forward;
pub mod scheduler;
pub mod tracing_setup;
pub mod wakeup;

pub use ack_timer::AckTimer;
pub use base::Base;
pub use events::{BaseEvent, EventBus};
pub use scheduler::{Debounce, Ticket};
pub use tracing_setup::init_tracing;
