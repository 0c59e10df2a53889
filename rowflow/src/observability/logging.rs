//! `tracing-subscriber` setup for binaries, tests and benches.

use tracing_subscriber::EnvFilter;

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs a human-readable subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to
/// `default_level`. Returns false if a global subscriber already exists.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Installs a JSON subscriber, one object per line.
///
/// Node threads are named after their node, so `threadName` identifies the
/// emitting node.
pub fn init_json_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_thread_names(true)
        .with_current_span(false)
        .try_init()
        .is_ok()
}
