//! Tracing initialization and span definitions.

pub mod spans;

use concord_core::config::TracingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Initialize the tracing subscriber.
///
/// Reads `CONCORD_LOG` for filter directives and falls back to
/// `config.level`. Output is JSON lines when `config.json` is set.
///
/// Returns `false` when a global subscriber was already installed, so
/// calling it more than once is safe.
pub fn init_tracing(config: &TracingConfig) -> bool {
    let filter = EnvFilter::try_from_env("CONCORD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer = if config.json {
        fmt::layer().with_target(true).json().boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .is_ok()
}
