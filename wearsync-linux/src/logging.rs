//! tracing subscriber setup for the daemon.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter: RUST_LOG if set and valid, else `fallback`, else "info".
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber (compact console output). Call once, before the runtime starts.
pub fn init(fallback_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(fallback_filter))
        .with(fmt::layer().with_target(true).compact())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
