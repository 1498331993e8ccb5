//! Tracing setup. Installing a subscriber is an application-level decision,
//! never done implicitly by the core, so this is an opt-in helper rather
//! than something `App::listen` calls on its own.

use tracing_subscriber::EnvFilter;

/// Install a `tracing_subscriber::fmt` subscriber with an `EnvFilter` read
/// from `RUST_LOG`, falling back to `"info,waypoint_core=debug"` when unset.
/// Call once, near the top of `main`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,waypoint_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Same as [`init_tracing`] but emits newline-delimited JSON, for
/// environments that ingest logs rather than read them on a terminal.
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,waypoint_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}
