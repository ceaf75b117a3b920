//! Subscriber setup for hosts that do not install their own.

#[cfg(feature = "tracing-basic")]
use tracing_subscriber::{fmt, EnvFilter};

#[cfg(feature = "tracing-basic")]
fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a human-readable fmt subscriber honouring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() -> bool {
    fmt()
        .with_env_filter(filter("info,dog_sync=debug"))
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install a JSON subscriber for structured log shipping
#[cfg(feature = "tracing-basic")]
pub fn init_json_tracing() -> bool {
    fmt()
        .json()
        .with_env_filter(filter("info"))
        .with_current_span(true)
        .try_init()
        .is_ok()
}
