//! Global `tracing` subscriber setup, matching the conventions of our other
//! binaries: compact, ANSI-colored stdout output, `RUST_LOG`-driven, INFO by
//! default.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

/// Initializes the global logger. Panics if a logger is already installed.
pub fn init() {
    let rust_log_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        .with_ansi(true)
        .with_filter(rust_log_filter);

    tracing_subscriber::registry()
        .with(stdout_log)
        .try_init()
        .expect("failed to install global logger");
}
