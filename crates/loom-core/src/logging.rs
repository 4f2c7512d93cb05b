//! Development-time tracing.
//!
//! The run journal (`journal.jsonl`) is the durable record of what a run did;
//! this module only wires `tracing` output for humans watching a terminal.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=loom_core=debug loom run audit --input target=contracts/
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedding) is not an error.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
