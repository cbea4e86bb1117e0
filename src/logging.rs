//! Tracing subscriber setup for binaries and tests embedding the crate.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber honoring `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init() {
    init_with_filter("info");
}

/// Install a formatted subscriber with an explicit default filter,
/// overridable through `RUST_LOG`.
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt().with_env_filter(filter).try_init();
}
