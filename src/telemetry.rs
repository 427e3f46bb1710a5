//! Logging initialization.
//!
//! Ralph has no distributed-tracing needs — one process, one run — so this
//! is a thin wrapper around `tracing-subscriber`'s env filter and a
//! stderr writer, not the OTLP pipeline a service would carry.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `verbose` raises the default
/// level from `info` to `debug` when `RUST_LOG` isn't set, and also
/// switches the formatter to JSON lines (so does `RALPH_LOG=json`) for
/// machine-readable output when ralph runs under another supervisor.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = verbose || std::env::var("RALPH_LOG").as_deref() == Ok("json");

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
