//! Span definitions per operation: drain, apply, migrate, fast-forward.

/// Create a drain span.
#[macro_export]
macro_rules! drain_span {
    ($local:expr, $indexed_length:expr) => {
        tracing::debug_span!("concord.drain", local = %$local, indexed_length = $indexed_length)
    };
}

/// Create an apply span.
#[macro_export]
macro_rules! apply_span {
    ($start:expr, $nodes:expr) => {
        tracing::debug_span!("concord.apply", start = $start, nodes = $nodes)
    };
}

/// Create a migration span.
#[macro_export]
macro_rules! migrate_span {
    ($indexers:expr) => {
        tracing::info_span!("concord.migrate", indexers = $indexers)
    };
}

/// Create a fast-forward span.
#[macro_export]
macro_rules! fast_forward_span {
    ($from:expr, $to:expr) => {
        tracing::info_span!("concord.fast_forward", from = $from, to = $to)
    };
}

/// Span names as constants for programmatic use.
pub mod names {
    pub const DRAIN: &str = "concord.drain";
    pub const APPLY: &str = "concord.apply";
    pub const MIGRATE: &str = "concord.migrate";
    pub const FAST_FORWARD: &str = "concord.fast_forward";
}
