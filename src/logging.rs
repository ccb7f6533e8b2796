//! Tracing setup for the mailroom binary and tests
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the process that embeds it. Routing, lifecycle transitions and
//! processing steps log at `debug`, agent start/stop at `info`, retries and
//! dropped bounces at `warn`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber filtered by RUST_LOG
///
/// Useful filters:
/// - `RUST_LOG=mailroom=info` agents starting and stopping
/// - `RUST_LOG=mailroom::mail=debug` every routed message and bounce
/// - `RUST_LOG=mailroom::agent=debug` lifecycle transitions and steps
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init() -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .pretty(),
        )
        .try_init()
        .map_err(|e| crate::RuntimeError::Other(format!("Failed to initialize tracing: {}", e)))
}

/// Install the subscriber once per test binary; later calls do nothing
pub fn init_test() {
    let _ = init();
}
