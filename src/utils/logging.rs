//! Tracing setup for host applications.
//!
//! The library itself only emits `tracing` events; hosts that want to see
//! them can call [`init_tracing`] once at startup, or install their own
//! subscriber.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
