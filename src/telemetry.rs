//! Tracing setup for hosts and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's call. [`init`] wires the stack used across this crate's
//! tests and demos: an `EnvFilter` honoring `RUST_LOG`, a compact fmt
//! layer, and `tracing_error`'s `ErrorLayer` so span context survives into
//! error reports.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default subscriber stack.
///
/// Filter resolution: `RUST_LOG` when set, otherwise `default_directives`
/// (e.g. `"warn,chatflow=info"`). Does nothing if a global subscriber is
/// already installed, so tests can call it repeatedly.
pub fn init(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}
