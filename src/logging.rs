#![forbid(unsafe_code)]

//! Diagnostic logging. User-facing progress still goes to stdout with
//! `println!`; everything emitted through `tracing` lands on stderr.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Builds the filter from `directives` (usually `AUTOUPLOAD_LOG`), falling
/// back to `info` when the directives do not parse.
pub fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(directives: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(build_filter(directives))
        .try_init();
}
