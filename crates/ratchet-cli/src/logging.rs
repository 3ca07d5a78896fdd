//! Diagnostic tracing for the CLI.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. Run artifacts
//! (`.ratchet/runs/`) are product output and are written regardless.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERBOSE_FILTER: &str = "warn,ratchet=info,ratchet_core=info,ratchet_conductor=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `warn`, or info for ratchet crates
/// with `verbose`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { "warn" })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
