mod storage;
mod wakeup;

pub use storage::{CoreKind, CoreOptions, CoreStore, LogCore};
pub use wakeup::{NoopWakeup, WakeupChannel};
