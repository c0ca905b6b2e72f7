//! # concord-apply
//!
//! Feeds linearized batches into the application's state machine.
//!
//! ## Modules
//!
//! - [`handlers`]: the application capability interface and batch entries
//! - [`host`]: membership and interrupt operations available inside `apply`
//! - [`view_store`]: named view cores with staged, all-or-nothing writes
//! - [`system`]: the reserved view recording one membership snapshot per node
//! - [`apply_state`]: batch application, migration, boot record upkeep
//! - [`fast_forward`]: checkpoint discovery and adoption

pub mod apply_state;
pub mod fast_forward;
pub mod handlers;
pub mod host;
pub mod system;
pub mod view_store;

pub use apply_state::{ApplyOutcome, ApplyState};
pub use fast_forward::find_checkpoint;
pub use handlers::{AddWriterOptions, ApplyEntry, Handlers};
pub use host::ApplyHost;
pub use system::SystemView;
pub use view_store::{ViewCore, ViewRef, ViewStore};
