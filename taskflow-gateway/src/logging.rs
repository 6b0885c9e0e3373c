//! Diagnostics for the gateway binary.
//!
//! Output goes to stderr so that stdout stays reserved for command results
//! (or the `--json` report consumed by the orchestrator).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing. Reads `RUST_LOG`, defaults to `warn`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
