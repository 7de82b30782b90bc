//! Tracing setup for test binaries

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber with `RUST_LOG` (default `info`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Same as [`init`] but emits JSON lines, for CI log collectors
pub fn init_json() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
