//! Tracing initialization for hosting processes
//!
//! The library itself only emits through `tracing` macros; hosts call
//! `logging::init()` once at startup to install a formatted subscriber
//! honoring `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the default subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
