//! Tracing initialization for embedding binaries.
//!
//! The core crate only *emits* `tracing` events; subscribing is the
//! application's job. [`init`] wires the standard stack: env-filtered fmt
//! output plus the error-layer so span traces attach to diagnostics.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the default subscriber. Safe to call once per process;
/// subsequent calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(ErrorLayer::default())
        .try_init();
}
